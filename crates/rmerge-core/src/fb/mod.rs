// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Progressive-frame message assembly, decode and merge (§2 components 1-2).
//!
//! Leaf-first dependency order: [`tile`] -> [`plane`] -> [`pack_tiles`] ->
//! [`single_chan`] -> [`multi_chans`] -> [`single_frame`] -> [`multi_frames`].

pub mod merge_action;
pub mod message;
pub mod multi_chans;
pub mod multi_frames;
pub mod pack_tiles;
pub mod plane;
pub mod single_chan;
pub mod single_frame;
pub mod tile;

pub use merge_action::{MergeActionTracker, MergeSequenceDequeue, MergeSequenceEnqueue, MergeSequenceEvent};
pub use message::{FrameStatus, NamedBuffer, ProgressiveFrame};
pub use multi_chans::FbMsgMultiChans;
pub use multi_frames::{FbMsgMultiFrames, MergeMode};
pub use pack_tiles::{DataType, PackTiles};
pub use plane::{Fb, PassPrecision, Plane};
pub use single_chan::FbMsgSingleChan;
pub use single_frame::FbMsgSingleFrame;
pub use tile::{ActivePixels, Viewport};
