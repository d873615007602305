// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Policy layer selecting which sync id(s) are live; ring buffer over
//! [`FbMsgSingleFrame`] slots (§4.5).

use std::sync::Arc;

use crate::error::Result;
use crate::fb::message::{channel, ProgressiveFrame};
use crate::fb::pack_tiles::PackTiles;
use crate::fb::single_frame::FbMsgSingleFrame;
use crate::sink::FleetInfoSink;

/// Merge policy selecting which sync id(s) are considered live (§3 "Multi-frame ring").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// One slot; display syncId advances monotonically; all data folded in
    /// regardless of producer's sync id. Feedback is disabled for this mode
    /// (§9 Open Questions: never intended to support feedback).
    SeamlessCombine,
    /// One slot; older messages are dropped; a newer sync id fully resets the slot.
    PickupLatest,
    /// Ring of `K` slots indexed by `syncId - startSyncId`.
    SyncIdLineUp,
}

/// A frame that was fully dropped (its slot was recycled or the message was
/// stale) while carrying data from at least one producer (§3 invariant: "a
/// dropped frame whose activeMachines > 0 is reported once").
#[derive(Debug, Clone, Copy)]
pub struct DroppedFrame {
    pub sync_id: u64,
    pub active_machines: u32,
}

pub struct FbMsgMultiFrames {
    mode: MergeMode,
    ring_depth: usize,
    producer_count: usize,
    fleet_sink: Option<Arc<dyn FleetInfoSink>>,

    slots: Vec<FbMsgSingleFrame>,
    /// `mPtrTable[0]` holds `startSyncId`'s slot, `[K-1]` holds `endSyncId`'s.
    ptr_table: Vec<usize>,
    start_sync_id: Option<u64>,
    end_sync_id: Option<u64>,
    pub display_sync_id: Option<u64>,

    pub dropped_frames: Vec<DroppedFrame>,
}

impl FbMsgMultiFrames {
    pub fn new(
        mode: MergeMode,
        ring_depth: usize,
        producer_count: usize,
        fleet_sink: Option<Arc<dyn FleetInfoSink>>,
    ) -> Self {
        let k = if mode == MergeMode::SyncIdLineUp { ring_depth.max(1) } else { 1 };
        Self {
            mode,
            ring_depth: k,
            producer_count,
            fleet_sink: fleet_sink.clone(),
            slots: (0..k)
                .map(|_| FbMsgSingleFrame::init(producer_count, fleet_sink.clone()))
                .collect(),
            ptr_table: (0..k).collect(),
            start_sync_id: None,
            end_sync_id: None,
            display_sync_id: None,
            dropped_frames: Vec::new(),
        }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn ring_depth(&self) -> usize {
        self.ring_depth
    }

    pub fn start_sync_id(&self) -> Option<u64> {
        self.start_sync_id
    }

    pub fn end_sync_id(&self) -> Option<u64> {
        self.end_sync_id
    }

    fn slot_for(&self, sync_id: u64) -> Option<&FbMsgSingleFrame> {
        let start = self.start_sync_id?;
        let offset = sync_id.checked_sub(start)? as usize;
        let phys = self.ptr_table.get(offset)?;
        self.slots.get(*phys)
    }

    pub fn slot_for_sync_id(&self, sync_id: u64) -> Option<&FbMsgSingleFrame> {
        match self.mode {
            MergeMode::SyncIdLineUp => self.slot_for(sync_id),
            _ => self.slots.first(),
        }
    }

    pub fn display_slot(&self) -> Option<&FbMsgSingleFrame> {
        let sid = self.display_sync_id?;
        self.slot_for_sync_id(sid)
    }

    /// §4.5 `push`.
    pub fn push<F: FnMut()>(
        &mut self,
        progressive_frame: &ProgressiveFrame,
        codec: &dyn PackTiles,
        mut feedback_init_callback: F,
    ) -> Result<()> {
        if progressive_frame.is_info_only() {
            if let Some(sink) = &self.fleet_sink {
                if let Some(aux_info) = progressive_frame.buffer(channel::AUX_INFO) {
                    sink.ingest_aux_info(progressive_frame.machine_id, &aux_info.bytes);
                }
            }
            return Ok(());
        }

        let sid = progressive_frame.frame_id;
        match self.mode {
            MergeMode::SeamlessCombine => {
                if self.display_sync_id.is_none() {
                    self.display_sync_id = Some(sid);
                }
                if sid > self.display_sync_id.unwrap() {
                    self.display_sync_id = Some(sid);
                }
                self.slots[0].push(progressive_frame, codec)
            }
            MergeMode::PickupLatest => {
                if self.display_sync_id.is_none() {
                    self.slots[0].reset_whole_history(sid);
                    self.display_sync_id = Some(sid);
                    feedback_init_callback();
                } else if sid < self.display_sync_id.unwrap() {
                    return Ok(()); // stale, drop
                } else if sid > self.display_sync_id.unwrap() {
                    self.slots[0].reset_whole_history(sid);
                    self.display_sync_id = Some(sid);
                    feedback_init_callback();
                }
                self.slots[0].push(progressive_frame, codec)
            }
            MergeMode::SyncIdLineUp => self.push_line_up(sid, progressive_frame, codec),
        }
    }

    fn push_line_up(&mut self, sid: u64, progressive_frame: &ProgressiveFrame, codec: &dyn PackTiles) -> Result<()> {
        if self.start_sync_id.is_none() {
            self.start_sync_id = Some(sid);
            self.end_sync_id = Some(sid + self.ring_depth as u64 - 1);
            self.display_sync_id = Some(sid);
        }

        let start = self.start_sync_id.unwrap();
        let end = self.end_sync_id.unwrap();

        if sid < self.display_sync_id.unwrap() {
            return Ok(()); // stale, drop
        }

        if sid > end {
            let shift = (sid - end) as usize;
            for _ in 0..shift {
                // Shift one position: head slot moves to the tail and is
                // renamed endSyncId + 1.
                let recycled_sync_id = self.start_sync_id.unwrap();
                let recycled_phys = self.ptr_table.remove(0);
                {
                    let recycled = &self.slots[recycled_phys];
                    if recycled.active_machines > 0 {
                        self.dropped_frames.push(DroppedFrame {
                            sync_id: recycled_sync_id,
                            active_machines: recycled.active_machines,
                        });
                    }
                }
                let new_end = self.end_sync_id.unwrap() + 1;
                self.slots[recycled_phys].reset_whole_history(new_end);
                self.ptr_table.push(recycled_phys);

                self.start_sync_id = Some(self.start_sync_id.unwrap() + 1);
                self.end_sync_id = Some(new_end);
            }
        }

        let start = self.start_sync_id.unwrap_or(start);
        let offset = (sid - start) as usize;
        let Some(&phys) = self.ptr_table.get(offset) else {
            return Ok(());
        };
        let was_ready_all = self.slots[phys].active_machines as usize == self.producer_count
            && self.producer_count > 0;
        self.slots[phys].push(progressive_frame, codec)?;
        let is_ready_all =
            self.slots[phys].active_machines as usize == self.producer_count && self.producer_count > 0;

        if !was_ready_all && is_ready_all && sid > self.display_sync_id.unwrap() {
            self.display_sync_id = Some(sid);
        }

        Ok(())
    }

    pub fn slot_mut_for_sync_id(&mut self, sync_id: u64) -> Option<&mut FbMsgSingleFrame> {
        match self.mode {
            MergeMode::SyncIdLineUp => {
                let start = self.start_sync_id?;
                let offset = sync_id.checked_sub(start)? as usize;
                let phys = *self.ptr_table.get(offset)?;
                self.slots.get_mut(phys)
            }
            _ => self.slots.first_mut(),
        }
    }
}
