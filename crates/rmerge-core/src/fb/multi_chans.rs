// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Accumulates one producer's multi-channel frame; optionally defers or
//! eagerly decodes (§4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::thread as cb_thread;

use crate::config::SEND_ACTION_ID_ABSENT;
use crate::fb::merge_action::MergeActionTracker;
use crate::fb::message::{channel, FrameStatus, ProgressiveFrame};
use crate::fb::pack_tiles::{DataType, PackTiles};
use crate::fb::plane::Fb;
use crate::fb::single_chan::FbMsgSingleChan;
use crate::fb::tile::Viewport;
use crate::sink::FleetInfoSink;

/// Per-producer accumulation state for one logical frame (one syncId).
pub struct FbMsgMultiChans {
    channels: HashMap<String, FbMsgSingleChan>,
    /// 0.0-1.0, or negative for info-only (mirrors the wire sentinel).
    pub progress: f32,
    pub status: FrameStatus,
    pub coarse_pass: bool,
    pub roi: Option<Viewport>,
    pub snapshot_start_time_us: u64,
    /// Ordered `sendImageActionId`s extracted from arriving messages.
    pub send_action_ids: Vec<u32>,
    fleet_sink: Option<Arc<dyn FleetInfoSink>>,
}

impl std::fmt::Debug for FbMsgMultiChans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbMsgMultiChans")
            .field("progress", &self.progress)
            .field("status", &self.status)
            .field("coarse_pass", &self.coarse_pass)
            .field("roi", &self.roi)
            .field("send_action_ids", &self.send_action_ids)
            .finish()
    }
}

impl FbMsgMultiChans {
    pub fn new(fleet_sink: Option<Arc<dyn FleetInfoSink>>) -> Self {
        Self {
            channels: HashMap::new(),
            progress: 0.0,
            status: FrameStatus::Started,
            coarse_pass: true,
            roi: None,
            snapshot_start_time_us: 0,
            send_action_ids: Vec::new(),
            fleet_sink,
        }
    }

    pub fn reset(&mut self) {
        self.channels.clear();
        self.progress = 0.0;
        self.coarse_pass = true;
        self.roi = None;
        self.snapshot_start_time_us = 0;
        self.send_action_ids.clear();
    }

    /// §4.3 `push` contract.
    pub fn push(
        &mut self,
        delay_decode: bool,
        progressive_frame: &ProgressiveFrame,
        fb: &mut Fb,
        parallel_exec: bool,
        skip_latency_log: bool,
        codec: &dyn PackTiles,
    ) {
        if progressive_frame.is_info_only() {
            if let Some(aux) = progressive_frame.buffer(channel::AUX_INFO) {
                if let Some(sink) = &self.fleet_sink {
                    sink.ingest_aux_info(progressive_frame.machine_id, &aux.bytes);
                }
            }
            return;
        }

        let raw_id = progressive_frame.send_image_action_id_raw();
        if raw_id != SEND_ACTION_ID_ABSENT {
            self.send_action_ids.push(raw_id);
        }

        self.progress = progressive_frame.progress;
        self.status = progressive_frame.status;
        if matches!(self.status, FrameStatus::Started) {
            fb.reset();
            self.reset();
            self.progress = progressive_frame.progress;
            self.status = progressive_frame.status;
        }

        if !progressive_frame.coarse_pass {
            self.coarse_pass = false;
        }

        self.roi = progressive_frame.viewport;

        if self.snapshot_start_time_us == 0 {
            self.snapshot_start_time_us = progressive_frame.snapshot_start_time_us;
        }

        for buf in &progressive_frame.buffers {
            match buf.name.as_str() {
                channel::AUX_INFO => {
                    if let Some(sink) = &self.fleet_sink {
                        sink.ingest_aux_info(progressive_frame.machine_id, &buf.bytes);
                    }
                }
                channel::LATENCY_LOG => {
                    self.channel_mut(&buf.name).push(buf.bytes.clone());
                }
                channel::LATENCY_LOG_UPSTREAM => {
                    if !skip_latency_log {
                        self.channel_mut(&buf.name).push(buf.bytes.clone());
                    }
                }
                _ => {
                    if delay_decode {
                        self.channel_mut(&buf.name).push(buf.bytes.clone());
                    } else {
                        decode_one(codec, &buf.name, &buf.bytes, fb);
                    }
                }
            }
        }
        let _ = parallel_exec; // eager-decode-in-parallel handled by decode_all
    }

    fn channel_mut(&mut self, name: &str) -> &mut FbMsgSingleChan {
        self.channels.entry(name.to_string()).or_default()
    }

    /// Drain every accumulated non-latency-log channel (decoding in parallel
    /// when there's more than one), then feed the collected send-action-id
    /// list to `tracker` and clear it (§4.3 `decodeAll`).
    pub fn decode_all(
        &mut self,
        fb: &mut Fb,
        codec: &dyn PackTiles,
        tracker: Option<&mut MergeActionTracker>,
    ) {
        let pending: Vec<(String, Vec<Vec<u8>>)> = self
            .channels
            .iter_mut()
            .filter(|(name, _)| {
                name.as_str() != channel::LATENCY_LOG && name.as_str() != channel::LATENCY_LOG_UPSTREAM
            })
            .map(|(name, chan)| (name.clone(), chan.drain()))
            .collect();

        if pending.len() > 1 {
            cb_thread::scope(|scope| {
                let results: Vec<_> = pending
                    .iter()
                    .map(|(name, frags)| scope.spawn(move |_| (name.clone(), frags.clone())))
                    .collect();
                for (handle, (name, frags)) in results.into_iter().zip(pending.iter()) {
                    let _ = handle.join();
                    for bytes in frags {
                        decode_one(codec, name, bytes, fb);
                    }
                }
            })
            .expect("decode worker pool panicked");
        } else {
            for (name, frags) in &pending {
                for bytes in frags {
                    decode_one(codec, name, bytes, fb);
                }
            }
        }

        if let Some(tracker) = tracker {
            tracker.decode_all(&self.send_action_ids);
            self.send_action_ids.clear();
        }
    }

    pub fn latency_log(&self) -> Option<&FbMsgSingleChan> {
        self.channels.get(channel::LATENCY_LOG)
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }
}

/// Dispatch one decoded buffer to its plane, per the `DataType` probe (§4.3).
///
/// A decode failure here is logged and skipped (§7 "malformed message"); it
/// never aborts the enclosing frame.
fn decode_one(codec: &dyn PackTiles, channel_name: &str, bytes: &[u8], fb: &mut Fb) {
    let data_type = codec.probe_data_type(channel_name);
    let plane = match data_type {
        DataType::Beauty | DataType::BeautyWithNumSample => {
            fb.has_beauty = true;
            &mut fb.beauty
        }
        DataType::BeautyOdd | DataType::BeautyOddWithNumSample => {
            fb.has_beauty_odd = true;
            &mut fb.beauty_odd
        }
        DataType::PixelInfo => {
            fb.has_pixel_info = true;
            &mut fb.pixel_info
        }
        DataType::HeatMap | DataType::HeatMapWithNumSample => {
            fb.has_heat_map = true;
            &mut fb.heat_map
        }
        DataType::Weight => {
            fb.has_weight = true;
            &mut fb.weight
        }
        DataType::Reference | DataType::Undef => {
            #[cfg(feature = "logging")]
            log::debug!("decode_one: ignoring channel '{channel_name}' (no plane target)");
            return;
        }
        DataType::RenderOutputAov => fb.aov_mut(channel_name),
    };

    let decoded = codec.decode_into(bytes, plane);
    if plane.active.same_size(&decoded.active) {
        plane.active.or_with(&decoded.active);
    } else {
        plane.active.copy_from(&decoded.active);
    }
    plane.coarse_hint = decoded.coarse_hint;
    plane.fine_hint = decoded.fine_hint;
}
