// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Runtime configuration for the merge core.
//!
//! Follows the same Level-1/Level-2 split as the teacher's global config
//! module: a handful of compile-time constants for protocol-fixed values
//! (tile size, command prefix) plus a small `RuntimeConfig` struct for the
//! operator-tunable knobs (merge mode, ring depth, socket retry policy).
//! **Never hardcode these elsewhere.**

use std::time::Duration;

/// Pixels per side of one tile (§3 Data Model: "Tile").
pub const TILE_SIZE: u32 = 8;

/// Literal first token of every MCRT-control command line (§6).
pub const MCRT_CONTROL_PREFIX: &str = "MCRT-control";

/// Sentinel used in place of an absent `sendImageActionId` (all-ones).
pub const SEND_ACTION_ID_ABSENT: u32 = u32::MAX;

/// Garbage-collection gate: minimum messages received before a producer's
/// framebuffer becomes eligible for slab compaction (§4.4 step 6).
pub const GC_MIN_MESSAGES: u32 = 5;

/// Garbage-collection gate: minimum elapsed time since a producer's first
/// message this frame before compaction is allowed (§4.4 step 6).
pub const GC_MIN_ELAPSED: Duration = Duration::from_millis(500);

/// Operator-tunable runtime configuration.
///
/// Constructed via [`RuntimeConfig::default`] and overridden field-by-field;
/// there is no global mutable singleton (unlike the teacher's `DashMap`-backed
/// QoS store, this crate's config surface is small enough to pass by value).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Depth `K` of the syncid-lineup ring (§3, §4.5).
    pub ring_depth: usize,

    /// Target SO_SNDBUF/SO_RCVBUF size in bytes (§4.9), capped by the kernel.
    pub socket_buffer_target: usize,

    /// Maximum `gethostbyname`-style resolution retries (§4.9 client connect).
    pub dns_retries: u32,

    /// Maximum TCP connect retries (§4.9 client connect).
    pub connect_retries: u32,

    /// Delay between connect retries.
    pub connect_retry_interval: Duration,

    /// Accept-loop poll interval (§4.9 server loop, §5 cancellation).
    pub accept_poll_interval: Duration,

    /// Number of worker threads used for the merge-thread plane/channel fan-out (§5).
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ring_depth: 4,
            socket_buffer_target: 32 * 1024 * 1024,
            dns_retries: 16,
            connect_retries: 10,
            connect_retry_interval: Duration::from_millis(500),
            accept_poll_interval: Duration::from_millis(100),
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}
