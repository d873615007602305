// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! End-to-end scenarios exercised against the crate's public API, one per
//! named scenario in spec.md section 8.

use rmerge_core::fb::merge_action::{
    CollectingVisitor, MergeActionTracker, MergeSequenceDequeue, MergeSequenceEnqueue, MergeSequenceEvent,
};
use rmerge_core::fb::message::{FrameStatus, ProgressiveFrame};
use rmerge_core::fb::pack_tiles::NullPackTiles;
use rmerge_core::fb::tile::Viewport;
use rmerge_core::fb::{FbMsgMultiFrames, MergeMode};
use rmerge_core::global_node_info::GlobalNodeInfo;

fn vp() -> Viewport {
    Viewport::new(0, 0, 16, 16)
}

fn msg(sid: u64, mid: i32, progress: f32) -> ProgressiveFrame {
    ProgressiveFrame {
        frame_id: sid,
        machine_id: mid,
        progress,
        status: FrameStatus::Rendering,
        coarse_pass: true,
        viewport: Some(vp()),
        snapshot_start_time_us: 1,
        send_image_action_id: None,
        denoiser_albedo_input_name: None,
        denoiser_normal_input_name: None,
        buffers: vec![],
    }
}

#[test]
fn s1_merge_sequence_codec_round_trips_the_literal_op_stream() {
    let events = [
        MergeSequenceEvent::DecodeSingle(10),
        MergeSequenceEvent::MergeAllTiles,
        MergeSequenceEvent::DecodeSingle(11),
        MergeSequenceEvent::MergeTileRange(123, 234),
        MergeSequenceEvent::DecodeRange(12, 21),
        MergeSequenceEvent::MergeTileSingle(235),
        MergeSequenceEvent::MergeTileRange(236, 456),
        MergeSequenceEvent::DecodeSingle(22),
        MergeSequenceEvent::MergeAllTiles,
        MergeSequenceEvent::Eod,
    ];
    let mut enq = MergeSequenceEnqueue::new();
    for e in events {
        enq.push(e);
    }
    let bytes = enq.into_bytes();

    let mut deq = MergeSequenceDequeue::new(&bytes);
    let mut visitor = CollectingVisitor::default();
    deq.decode_loop(&mut visitor);
    assert_eq!(visitor.events, events);
}

#[test]
fn s2_merge_action_tracker_collapses_to_the_expected_replay() {
    let mut tracker = MergeActionTracker::new();
    tracker.decode_all(&[12, 13, 15, 16, 17]);
    tracker.merge_full();
    let bitmap = [true, true, false, false, false, true, false, false, true, true, true, false];
    tracker.merge_partial(&bitmap);

    let encoded = tracker.encode_data();
    let (payload, _) = MergeActionTracker::decode_data_capture(&encoded).unwrap();
    let mut deq = MergeSequenceDequeue::new(payload);
    let mut visitor = CollectingVisitor::default();
    deq.decode_loop(&mut visitor);

    assert_eq!(
        visitor.events,
        vec![
            MergeSequenceEvent::DecodeRange(12, 13),
            MergeSequenceEvent::DecodeRange(15, 17),
            MergeSequenceEvent::MergeAllTiles,
            MergeSequenceEvent::MergeTileRange(0, 1),
            MergeSequenceEvent::MergeTileSingle(5),
            MergeSequenceEvent::MergeTileRange(8, 10),
            MergeSequenceEvent::Eod,
        ]
    );
}

#[test]
fn s3_sync_id_line_up_shifts_and_drops_the_stale_fourth_push() {
    let mut mf = FbMsgMultiFrames::new(MergeMode::SyncIdLineUp, 4, 1, None);
    let codec = NullPackTiles;

    mf.push(&msg(100, 0, 0.1), &codec, || {}).unwrap();
    mf.push(&msg(102, 0, 0.1), &codec, || {}).unwrap();
    mf.push(&msg(105, 0, 0.1), &codec, || {}).unwrap();
    assert_eq!(mf.start_sync_id(), Some(102));
    assert_eq!(mf.end_sync_id(), Some(105));
    assert!(mf.slot_for_sync_id(100).is_none());

    mf.push(&msg(101, 0, 0.5), &codec, || {}).unwrap();
    assert_eq!(mf.start_sync_id(), Some(102), "stale syncId 101 must be dropped, not reopen the window");
}

#[test]
fn s4_pickup_latest_fully_resets_the_slot_on_a_newer_sync_id() {
    let mut mf = FbMsgMultiFrames::new(MergeMode::PickupLatest, 1, 1, None);
    let codec = NullPackTiles;

    mf.push(&msg(10, 0, 0.3), &codec, || {}).unwrap();
    mf.push(&msg(12, 0, 0.1), &codec, || {}).unwrap();

    let slot = mf.display_slot().unwrap();
    assert!((slot.aggregate_progress - 0.1).abs() < 1e-6);
    assert_eq!(mf.display_sync_id, Some(12));
}

#[test]
fn s6_info_codec_associative_table_round_trips_two_fleet_nodes() {
    let fleet = GlobalNodeInfo::new();
    fleet.node(3).set_host_name("node-3");
    fleet.node(3).set_sync_id(111);
    fleet.node(7).set_host_name("node-7");
    fleet.node(7).set_sync_id(222);

    let (ok, bytes) = fleet.encode();
    assert!(ok);

    let decoded = GlobalNodeInfo::new();
    decoded.decode(&bytes).unwrap();

    assert_eq!(decoded.machine_ids(), vec![3, 7]);
    assert_eq!(*decoded.node(3).host_name.lock(), "node-3");
    assert_eq!(*decoded.node(3).current_sync_id.lock(), 111);
    assert_eq!(*decoded.node(7).host_name.lock(), "node-7");
    assert_eq!(*decoded.node(7).current_sync_id.lock(), 222);
}
