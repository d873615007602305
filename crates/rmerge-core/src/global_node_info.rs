// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Fleet-wide live state: one [`McrtNodeInfo`] per MCRT node, keyed by
//! machine id, plus clock-delta bookkeeping and aggregate progress (§3 "Fleet
//! state", §4.7).

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::info_codec::InfoCodec;
use crate::node_info::{McrtNodeInfo, NodeStat};
use crate::sink::FleetInfoSink;

/// One clock-delta round-trip sample (§4.9 clock-delta handshake).
///
/// `t0`/`t3` are measured on the requesting side (microseconds, monotonic
/// clock of that side); `t1`/`t2` are echoed back by the peer. The
/// client/server naming follows the handshake roles, not TCP client/server.
#[derive(Debug, Clone, Copy)]
pub struct ClockDeltaSample {
    pub t0_request_sent_us: u64,
    pub t1_peer_received_us: u64,
    pub t2_peer_replied_us: u64,
    pub t3_reply_received_us: u64,
}

impl ClockDeltaSample {
    /// Standard NTP-style offset/round-trip-delay computation.
    ///
    /// Returns `(offset_us, round_trip_us)` where `offset_us` is how far
    /// ahead the peer's clock is relative to ours (add it to our local time
    /// to project it onto the peer's clock).
    pub fn offset_and_round_trip(&self) -> (i64, u64) {
        let t0 = self.t0_request_sent_us as i64;
        let t1 = self.t1_peer_received_us as i64;
        let t2 = self.t2_peer_replied_us as i64;
        let t3 = self.t3_reply_received_us as i64;
        let offset = ((t1 - t0) + (t2 - t3)) / 2;
        let round_trip = (t3 - t0) - (t2 - t1);
        (offset, round_trip.max(0) as u64)
    }
}

/// Fleet-wide view across all MCRT nodes (§3 "GlobalNodeInfo").
///
/// Nodes are constructed lazily: the first reference to a `machineId` (via
/// [`Self::node`] or an incoming aux-info decode) creates its
/// [`McrtNodeInfo`] entry. `DashMap` gives us lock-free reads for the common
/// case of many merge threads polling node stats concurrently.
pub struct GlobalNodeInfo {
    nodes: DashMap<i32, Arc<McrtNodeInfo>>,
}

impl Default for GlobalNodeInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalNodeInfo {
    pub fn new() -> Self {
        Self { nodes: DashMap::new() }
    }

    /// Get-or-create the node entry for `machine_id`.
    pub fn node(&self, machine_id: i32) -> Arc<McrtNodeInfo> {
        self.nodes
            .entry(machine_id)
            .or_insert_with(|| Arc::new(McrtNodeInfo::new(machine_id, format!("node-{machine_id}"))))
            .clone()
    }

    pub fn machine_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.nodes.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Decode one producer's `mcrtNodeInfo` item and write it through to that
    /// node's live fields (§4.7: aux-info ingestion drives node state the
    /// same way direct setter calls do on the producer side).
    pub fn apply_info_record(&self, machine_id: i32, bytes: &[u8]) -> Result<usize> {
        let codec = InfoCodec::new("mcrtNodeInfo");
        let node = self.node(machine_id);
        codec.decode(bytes, |item| {
            if let Some(host) = item.get_str("hostName") {
                node.set_host_name(host);
            }
            if let (Some(total), Some(assigned)) = (item.get_u64("totalCpus"), item.get_u64("assignedCpus")) {
                let per_core = item.get_vec_f32("perCoreUsage").unwrap_or_default();
                node.set_cpu_stats(total as u32, assigned as u32, &per_core);
            }
            if let Some(shift) = item.get_f64("clockTimeShiftMs") {
                node.set_clock_time_shift(shift);
            }
            if let Some(sync_id) = item.get_u64("syncId") {
                node.set_sync_id(sync_id);
            }
            if let Some(active) = item.get_bool("renderActive") {
                node.set_render_active(active);
            }
            if let Some(progress) = item.get_f64("progress") {
                node.set_progress(progress as f32);
            }
            true
        })
    }

    /// Apply a clock-delta round-trip sample, storing the derived offset on
    /// the node's `clockTimeShiftMs` field (§4.9).
    pub fn clock_delta_client_main_against_merge(&self, machine_id: i32, sample: ClockDeltaSample) -> i64 {
        let (offset_us, _round_trip_us) = sample.offset_and_round_trip();
        let node = self.node(machine_id);
        node.set_clock_time_shift(offset_us as f64 / 1000.0);
        *node.last_clock_offset_applied_us.lock() = sample.t3_reply_received_us;
        offset_us
    }

    pub fn set_clock_delta_time_shift(&self, machine_id: i32, shift_ms: f64) {
        self.node(machine_id).set_clock_time_shift(shift_ms);
    }

    /// Fleet-wide render-prep completion, `0.0` if none are tracked yet
    /// (§4.7 `getRenderPrepProgress`). Only nodes at the newest observed sync
    /// id count: their raw `currSteps` are summed, their largest
    /// `maxTotalSteps` is taken once, and the result is divided by
    /// `maxTotalSteps * N` where `N` is the total node count — not an
    /// average of each node's own fraction.
    pub fn render_prep_progress(&self) -> f32 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let newest_sync_id = self.nodes.iter().map(|e| *e.current_sync_id.lock()).max().unwrap_or(0);

        let mut max_total_steps: u32 = 0;
        let mut curr_steps_all: u32 = 0;
        for entry in self.nodes.iter() {
            if *entry.current_sync_id.lock() != newest_sync_id {
                continue;
            }
            let (curr, total) = entry.render_prep_raw_steps();
            max_total_steps = max_total_steps.max(total);
            curr_steps_all += curr;
        }

        let total_steps_all = max_total_steps as u64 * self.nodes.len() as u64;
        if total_steps_all == 0 {
            return 0.0;
        }
        curr_steps_all as f32 / total_steps_all as f32
    }

    pub fn node_stat(&self, machine_id: i32) -> Option<NodeStat> {
        self.nodes.get(&machine_id).map(|e| e.node_stat())
    }

    /// Encode the whole fleet as an associative table keyed by machine id
    /// string, one entry per node (§4.1 `encodeTable`, §3 "Fleet state").
    pub fn encode(&self) -> (bool, Vec<u8>) {
        let fleet = InfoCodec::new("fleet");
        for entry in self.nodes.iter() {
            entry.value().flush_encode_data();
            fleet.encode_table("mcrtNodeInfoMap", &entry.key().to_string(), entry.value().codec());
        }
        fleet.commit_item();
        fleet.encode()
    }

    /// Decode a fleet-table snapshot, lazily creating nodes named by table key.
    pub fn decode(&self, bytes: &[u8]) -> Result<usize> {
        let fleet = InfoCodec::new("fleet");
        fleet.decode(bytes, |item| {
            for key in item.table_keys("mcrtNodeInfoMap") {
                let Ok(machine_id) = key.parse::<i32>() else { continue };
                let _ = item.get_table_entry("mcrtNodeInfoMap", &key, "mcrtNodeInfo", |node_item| {
                    let node = self.node(machine_id);
                    if let Some(host) = node_item.get_str("hostName") {
                        node.set_host_name(host);
                    }
                    if let Some(sync_id) = node_item.get_u64("syncId") {
                        node.set_sync_id(sync_id);
                    }
                    true
                });
            }
            true
        })
    }
}

impl FleetInfoSink for GlobalNodeInfo {
    fn ingest_aux_info(&self, machine_id: i32, bytes: &[u8]) {
        let _ = self.apply_info_record(machine_id, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn lazy_node_construction_on_first_reference() {
        let fleet = GlobalNodeInfo::new();
        assert_eq!(fleet.node_count(), 0);
        fleet.node(3);
        fleet.node(7);
        fleet.node(3);
        assert_eq!(fleet.node_count(), 2);
        assert_eq!(fleet.machine_ids(), vec![3, 7]);
    }

    #[test]
    fn clock_delta_offset_matches_ntp_formula() {
        let sample = ClockDeltaSample {
            t0_request_sent_us: 1_000,
            t1_peer_received_us: 1_500,
            t2_peer_replied_us: 1_520,
            t3_reply_received_us: 1_100,
        };
        let (offset, round_trip) = sample.offset_and_round_trip();
        assert_eq!(offset, 460);
        assert_eq!(round_trip, 80);
    }

    #[test]
    fn clock_delta_applied_updates_node_shift() {
        let fleet = GlobalNodeInfo::new();
        let sample = ClockDeltaSample {
            t0_request_sent_us: 0,
            t1_peer_received_us: 100_000,
            t2_peer_replied_us: 110_000,
            t3_reply_received_us: 20_000,
        };
        fleet.clock_delta_client_main_against_merge(1, sample);
        let node = fleet.node(1);
        assert!((*node.clock_time_shift_ms.lock() - 95.0).abs() < 1e-6);
    }

    #[test]
    fn apply_info_record_round_trips_through_node_setters() {
        // S6: fleet of two nodes reporting through InfoCodec.
        let producer = InfoCodec::new("mcrtNodeInfo");
        producer.set("hostName", Value::String("node-a".to_string()));
        producer.set("syncId", Value::from(42u64));
        producer.set("renderActive", Value::from(true));
        producer.commit_item();
        let (ok, bytes) = producer.encode();
        assert!(ok);

        let fleet = GlobalNodeInfo::new();
        fleet.ingest_aux_info(5, &bytes);
        let node = fleet.node(5);
        assert_eq!(*node.host_name.lock(), "node-a");
        assert_eq!(*node.current_sync_id.lock(), 42);
        assert!(*node.render_active.lock());
        assert!(matches!(fleet.node_stat(5), Some(NodeStat::Mcrt)));
    }

    #[test]
    fn render_prep_progress_sums_filtered_by_newest_sync_id() {
        // Two nodes at the newest syncId (5) drive the aggregate; a third,
        // stale node at syncId 2 is excluded from the sum/max but still
        // counts toward N in the denominator.
        let fleet = GlobalNodeInfo::new();
        fleet.node(1).set_sync_id(5);
        fleet
            .node(1)
            .set_render_prep_stats(crate::node_info::RenderPrepStage::LoadGeo0Process, 50, 100);
        fleet.node(2).set_sync_id(5);
        fleet
            .node(2)
            .set_render_prep_stats(crate::node_info::RenderPrepStage::LoadGeo0Process, 30, 60);
        fleet.node(3).set_sync_id(2);
        fleet
            .node(3)
            .set_render_prep_stats(crate::node_info::RenderPrepStage::LoadGeo0Process, 1000, 1);

        // maxTotalSteps = max(100, 60) = 100, currStepsAll = 50 + 30 = 80,
        // N = 3 nodes total, so progress = 80 / (100 * 3).
        let progress = fleet.render_prep_progress();
        assert!((progress - (80.0 / 300.0)).abs() < 1e-6);
    }

    #[test]
    fn encode_decode_table_round_trips_machine_ids() {
        let fleet = GlobalNodeInfo::new();
        fleet.node(3).set_host_name("node-3");
        fleet.node(7).set_host_name("node-7");
        let (ok, bytes) = fleet.encode();
        assert!(ok);

        let decoded = GlobalNodeInfo::new();
        decoded.decode(&bytes).unwrap();
        assert_eq!(decoded.machine_ids(), vec![3, 7]);
    }
}
