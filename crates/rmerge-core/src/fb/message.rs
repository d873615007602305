// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Inbound/outbound `ProgressiveFrame` message shape (§6 External Interfaces).

use crate::config::SEND_ACTION_ID_ABSENT;
use crate::fb::tile::Viewport;

/// Frame status as carried by a single producer's progressive-frame message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Started,
    Rendering,
    Finished,
    Cancelled,
    Error,
}

/// One named buffer included in a progressive-frame message.
#[derive(Debug, Clone)]
pub struct NamedBuffer {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Reserved channel names (§6).
pub mod channel {
    pub const AUX_INFO: &str = "auxInfo";
    pub const LATENCY_LOG: &str = "latencyLog";
    pub const LATENCY_LOG_UPSTREAM: &str = "latencyLogUpstream";
    pub const BEAUTY: &str = "Beauty";
    pub const RENDER_BUFFER_ODD: &str = "RenderBufferOdd";
}

/// One producer's progressive-frame message, inbound to the merge node.
///
/// `progress < 0.0` marks an info-only message (§6); `send_image_action_id ==
/// None` is the wire sentinel `SEND_ACTION_ID_ABSENT` (all-ones).
#[derive(Debug, Clone)]
pub struct ProgressiveFrame {
    pub frame_id: u64,
    pub machine_id: i32,
    pub progress: f32,
    pub status: FrameStatus,
    pub coarse_pass: bool,
    pub viewport: Option<Viewport>,
    pub snapshot_start_time_us: u64,
    pub send_image_action_id: Option<u32>,
    pub denoiser_albedo_input_name: Option<String>,
    pub denoiser_normal_input_name: Option<String>,
    pub buffers: Vec<NamedBuffer>,
}

impl ProgressiveFrame {
    /// `true` iff this message carries no pixel data, only fleet info.
    pub fn is_info_only(&self) -> bool {
        self.progress < 0.0
    }

    pub fn send_image_action_id_raw(&self) -> u32 {
        self.send_image_action_id.unwrap_or(SEND_ACTION_ID_ABSENT)
    }

    pub fn buffer(&self, name: &str) -> Option<&NamedBuffer> {
        self.buffers.iter().find(|b| b.name == name)
    }
}
