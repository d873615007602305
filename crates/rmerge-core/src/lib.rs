// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Merge/coordination core for a distributed interactive renderer.
//!
//! This crate assembles per-producer progressive-frame messages into one
//! merged, displayable framebuffer, tracks the merge-action history needed
//! to replay how a given pixel's value was assembled, and keeps a schema-less
//! view of fleet-wide node health alongside the clock-delta handshake that
//! keeps node clocks comparable. It does not render pixels, transcode
//! images, or manage process lifecycles — those are out of scope (§1).
//!
//! Module map, leaf-first:
//!
//! | module | role |
//! |---|---|
//! | [`config`] | compile-time constants and [`config::RuntimeConfig`] |
//! | [`error`] | [`error::CoreError`] and the crate's `Result` alias |
//! | [`fb`] | progressive-frame decode, merge, and the multi-frame ring |
//! | [`info_codec`] | schema-less key/value wire codec |
//! | [`node_info`] | per-node live state ([`node_info::McrtNodeInfo`]) |
//! | [`global_node_info`] | fleet-wide state and clock-delta orchestration |
//! | [`merge_fb_sender`] | outbound pass-precision selection and HDRI test |
//! | [`control`] | `MCRT-control` command parsing and dispatch |
//! | [`net`] | clock-delta transport: socket primitives, client, server |
//! | [`metrics`] | `ValueTimeTracker` and `SysUsage` |
//! | [`sink`] | [`sink::FleetInfoSink`], the aux-info routing seam |

pub mod config;
pub mod control;
pub mod error;
pub mod fb;
pub mod global_node_info;
pub mod info_codec;
pub mod merge_fb_sender;
pub mod metrics;
pub mod net;
pub mod node_info;
pub mod sink;

pub use config::RuntimeConfig;
pub use error::{CoreError, Result};
pub use global_node_info::GlobalNodeInfo;
pub use node_info::McrtNodeInfo;
