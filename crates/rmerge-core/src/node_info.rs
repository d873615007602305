// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Per-node live state: all producer-side liveness for one MCRT node (§3, §4.7).

use parking_lot::Mutex;
use serde_json::Value;

use crate::info_codec::InfoCodec;

/// Rendering execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Scalar,
    Vector,
    Xpu,
    Auto,
    Unknown,
}

/// Derived node state, computed from flags + render-prep substate (§3, §4.7 `getNodeStat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStat {
    Idle,
    RenderPrepRun,
    RenderPrepCancel,
    Mcrt,
}

/// Render-prep substages (§4.7 `setRenderPrepStats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPrepStage {
    LoadGeo0Start,
    LoadGeo0Process,
    LoadGeo0StartCanceled,
    LoadGeo0Done,
    LoadGeo0DoneCanceled,
    LoadGeo1Start,
    LoadGeo1Process,
    LoadGeo1StartCanceled,
    LoadGeo1Done,
    LoadGeo1DoneCanceled,
    Tessellation0Start,
    Tessellation0Process,
    Tessellation0StartCanceled,
    Tessellation0Done,
    Tessellation0DoneCanceled,
    Tessellation1Start,
    Tessellation1Process,
    Tessellation1StartCanceled,
    Tessellation1Done,
    Tessellation1DoneCanceled,
}

impl RenderPrepStage {
    fn family(self) -> RenderPrepFamily {
        use RenderPrepStage::*;
        match self {
            LoadGeo0Start | LoadGeo0Process | LoadGeo0StartCanceled | LoadGeo0Done | LoadGeo0DoneCanceled => {
                RenderPrepFamily::LoadGeo0
            }
            LoadGeo1Start | LoadGeo1Process | LoadGeo1StartCanceled | LoadGeo1Done | LoadGeo1DoneCanceled => {
                RenderPrepFamily::LoadGeo1
            }
            Tessellation0Start
            | Tessellation0Process
            | Tessellation0StartCanceled
            | Tessellation0Done
            | Tessellation0DoneCanceled => RenderPrepFamily::Tessellation0,
            Tessellation1Start
            | Tessellation1Process
            | Tessellation1StartCanceled
            | Tessellation1Done
            | Tessellation1DoneCanceled => RenderPrepFamily::Tessellation1,
        }
    }

    fn is_process(self) -> bool {
        use RenderPrepStage::*;
        matches!(self, LoadGeo0Process | LoadGeo1Process | Tessellation0Process | Tessellation1Process)
    }

    fn is_cancel(self) -> bool {
        use RenderPrepStage::*;
        matches!(
            self,
            LoadGeo0StartCanceled
                | LoadGeo0DoneCanceled
                | LoadGeo1StartCanceled
                | LoadGeo1DoneCanceled
                | Tessellation0StartCanceled
                | Tessellation0DoneCanceled
                | Tessellation1StartCanceled
                | Tessellation1DoneCanceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderPrepFamily {
    LoadGeo0,
    LoadGeo1,
    Tessellation0,
    Tessellation1,
}

/// A render-prep progress update, staged until the next `flushEncodeData`
/// (§4.7: "PROCESS updates can arrive at kHz; we amortize them").
#[derive(Debug, Default, Clone, Copy)]
struct RenderPrepWork {
    curr_steps: u32,
    max_total_steps: u32,
    dirty: bool,
}

#[derive(Debug, Default)]
struct RenderPrepStaging {
    load_geo0: RenderPrepWork,
    load_geo1: RenderPrepWork,
    tessellation0: RenderPrepWork,
    tessellation1: RenderPrepWork,
    active: bool,
    cancel_requested: bool,
}

/// Per-node live state for one MCRT node (§3 "McrtNodeInfo").
///
/// Each setter writes through the owned [`InfoCodec`] (in-memory field plus
/// queued encode item) and the type is `Send + Sync`: thread-safety comes
/// from the codec's internal lock plus the small explicit mutexes below for
/// staged render-prep stats and the generic-comment queue.
pub struct McrtNodeInfo {
    codec: InfoCodec,

    pub host_name: Mutex<String>,
    pub machine_id: i32,
    pub total_cpus: Mutex<u32>,
    pub assigned_cpus: Mutex<u32>,
    pub per_core_usage: Mutex<Vec<f32>>,
    pub mem_total_mb: Mutex<u64>,
    pub mem_usage_fraction: Mutex<f32>,
    pub exec_mode: Mutex<ExecMode>,

    pub snapshot_latency_ms: Mutex<f32>,
    pub send_bandwidth_bps: Mutex<f64>,
    pub feedback_latency_ms: Mutex<f32>,

    pub clock_time_shift_ms: Mutex<f64>,
    pub last_clock_offset_applied_us: Mutex<u64>,

    pub current_sync_id: Mutex<u64>,
    pub render_active: Mutex<bool>,
    pub render_prep_cancel: Mutex<bool>,

    render_prep: Mutex<RenderPrepStaging>,

    pub global_epoch_base_us: Mutex<u64>,
    pub render_prep_start_us: Mutex<u64>,
    pub render_prep_end_us: Mutex<u64>,
    pub first_snapshot_start_us: Mutex<u64>,
    pub first_snapshot_end_us: Mutex<u64>,
    pub first_send_us: Mutex<u64>,

    pub progress: Mutex<f32>,

    generic_comments: Mutex<Vec<String>>,
}

impl McrtNodeInfo {
    pub fn new(machine_id: i32, host_name: impl Into<String>) -> Self {
        Self {
            codec: InfoCodec::new("mcrtNodeInfo"),
            host_name: Mutex::new(host_name.into()),
            machine_id,
            total_cpus: Mutex::new(0),
            assigned_cpus: Mutex::new(0),
            per_core_usage: Mutex::new(Vec::new()),
            mem_total_mb: Mutex::new(0),
            mem_usage_fraction: Mutex::new(0.0),
            exec_mode: Mutex::new(ExecMode::Unknown),
            snapshot_latency_ms: Mutex::new(0.0),
            send_bandwidth_bps: Mutex::new(0.0),
            feedback_latency_ms: Mutex::new(0.0),
            clock_time_shift_ms: Mutex::new(0.0),
            last_clock_offset_applied_us: Mutex::new(0),
            current_sync_id: Mutex::new(0),
            render_active: Mutex::new(false),
            render_prep_cancel: Mutex::new(false),
            render_prep: Mutex::new(RenderPrepStaging::default()),
            global_epoch_base_us: Mutex::new(0),
            render_prep_start_us: Mutex::new(0),
            render_prep_end_us: Mutex::new(0),
            first_snapshot_start_us: Mutex::new(0),
            first_snapshot_end_us: Mutex::new(0),
            first_send_us: Mutex::new(0),
            progress: Mutex::new(0.0),
            generic_comments: Mutex::new(Vec::new()),
        }
    }

    pub fn codec(&self) -> &InfoCodec {
        &self.codec
    }

    pub fn set_host_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.codec.set("hostName", Value::String(name.clone()));
        *self.host_name.lock() = name;
    }

    pub fn set_cpu_stats(&self, total: u32, assigned: u32, per_core_usage: &[f32]) {
        self.codec.set("totalCpus", Value::from(total));
        self.codec.set("assignedCpus", Value::from(assigned));
        self.codec.set_vec("perCoreUsage", per_core_usage);
        *self.total_cpus.lock() = total;
        *self.assigned_cpus.lock() = assigned;
        *self.per_core_usage.lock() = per_core_usage.to_vec();
    }

    pub fn set_mem_stats(&self, total_mb: u64, usage_fraction: f32) {
        self.codec.set("memTotalMb", Value::from(total_mb));
        self.codec.set("memUsageFraction", Value::from(usage_fraction as f64));
        *self.mem_total_mb.lock() = total_mb;
        *self.mem_usage_fraction.lock() = usage_fraction;
    }

    pub fn set_exec_mode(&self, mode: ExecMode) {
        let tag = match mode {
            ExecMode::Scalar => "SCALAR",
            ExecMode::Vector => "VECTOR",
            ExecMode::Xpu => "XPU",
            ExecMode::Auto => "AUTO",
            ExecMode::Unknown => "UNKNOWN",
        };
        self.codec.set("execMode", Value::String(tag.to_string()));
        *self.exec_mode.lock() = mode;
    }

    pub fn set_sync_id(&self, sync_id: u64) {
        self.codec.set("syncId", Value::from(sync_id));
        *self.current_sync_id.lock() = sync_id;
    }

    pub fn set_render_active(&self, active: bool) {
        self.codec.set("renderActive", Value::from(active));
        *self.render_active.lock() = active;
    }

    pub fn set_progress(&self, progress: f32) {
        self.codec.set("progress", Value::from(progress as f64));
        *self.progress.lock() = progress;
    }

    pub fn set_clock_time_shift(&self, shift_ms: f64) {
        self.codec.set("clockTimeShiftMs", Value::from(shift_ms));
        *self.clock_time_shift_ms.lock() = shift_ms;
    }

    /// Gated render-prep state machine (§4.7). `PROCESS` substages stash
    /// their progress counter and request a flush; everything else flushes
    /// immediately.
    pub fn set_render_prep_stats(&self, stage: RenderPrepStage, curr_steps: u32, max_total_steps: u32) {
        let mut staging = self.render_prep.lock();
        staging.active = !stage.is_cancel();
        staging.cancel_requested = stage.is_cancel();

        let work = match stage.family() {
            RenderPrepFamily::LoadGeo0 => &mut staging.load_geo0,
            RenderPrepFamily::LoadGeo1 => &mut staging.load_geo1,
            RenderPrepFamily::Tessellation0 => &mut staging.tessellation0,
            RenderPrepFamily::Tessellation1 => &mut staging.tessellation1,
        };
        work.curr_steps = curr_steps;
        work.max_total_steps = max_total_steps;
        work.dirty = true;

        drop(staging);
        if !stage.is_process() {
            self.flush_encode_data();
        }
    }

    /// Drain the staged render-prep work record into the codec; called once
    /// per encode cycle (picks up whatever `PROCESS` updates accumulated).
    pub fn flush_encode_data(&self) {
        let mut staging = self.render_prep.lock();
        for (key, work) in [
            ("renderPrepLoadGeo0", &mut staging.load_geo0),
            ("renderPrepLoadGeo1", &mut staging.load_geo1),
            ("renderPrepTessellation0", &mut staging.tessellation0),
            ("renderPrepTessellation1", &mut staging.tessellation1),
        ] {
            if work.dirty {
                self.codec
                    .set(key, Value::from(format!("{}/{}", work.curr_steps, work.max_total_steps)));
                work.dirty = false;
            }
        }
        self.codec.set("renderPrepCancel", Value::from(staging.cancel_requested));
        *self.render_prep_cancel.lock() = staging.cancel_requested;
    }

    pub fn render_prep_progress(&self) -> f32 {
        let (curr, total_steps) = self.render_prep_raw_steps();
        if total_steps == 0 {
            return 0.0;
        }
        curr as f32 / total_steps as f32
    }

    /// This node's `(currSteps, maxTotalSteps)` summed across all four
    /// render-prep families, the raw inputs to the fleet-level aggregate
    /// (§4.7 `getRenderPrepProgress`).
    pub fn render_prep_raw_steps(&self) -> (u32, u32) {
        let staging = self.render_prep.lock();
        let families = [
            staging.load_geo0,
            staging.load_geo1,
            staging.tessellation0,
            staging.tessellation1,
        ];
        let curr: u32 = families.iter().map(|f| f.curr_steps).sum();
        let total_steps: u32 = families.iter().map(|f| f.max_total_steps).sum();
        (curr, total_steps)
    }

    /// §4.7 `getNodeStat`: RENDER_PREP_CANCEL dominates, then RENDER_PREP_RUN, then MCRT, else IDLE.
    pub fn node_stat(&self) -> NodeStat {
        let staging = self.render_prep.lock();
        if staging.cancel_requested {
            return NodeStat::RenderPrepCancel;
        }
        if staging.active {
            return NodeStat::RenderPrepRun;
        }
        if *self.render_active.lock() {
            return NodeStat::Mcrt;
        }
        NodeStat::Idle
    }

    pub fn enq_generic_comment(&self, comment: impl Into<String>) {
        self.generic_comments.lock().push(comment.into());
    }

    pub fn drain_generic_comments(&self) -> Vec<String> {
        std::mem::take(&mut *self.generic_comments.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_updates_stage_until_flush() {
        let node = McrtNodeInfo::new(0, "host-a");
        node.set_render_prep_stats(RenderPrepStage::LoadGeo0Start, 0, 100);
        node.set_render_prep_stats(RenderPrepStage::LoadGeo0Process, 10, 100);
        node.set_render_prep_stats(RenderPrepStage::LoadGeo0Process, 20, 100);
        assert!((node.render_prep_progress() - 0.2).abs() < 1e-6);
        assert!(matches!(node.node_stat(), NodeStat::RenderPrepRun));
    }

    #[test]
    fn cancel_dominates_node_stat() {
        let node = McrtNodeInfo::new(0, "host-a");
        node.set_render_prep_stats(RenderPrepStage::LoadGeo0Start, 0, 100);
        node.set_render_active(true);
        node.set_render_prep_stats(RenderPrepStage::LoadGeo0StartCanceled, 0, 100);
        assert!(matches!(node.node_stat(), NodeStat::RenderPrepCancel));
    }

    #[test]
    fn idle_when_nothing_active() {
        let node = McrtNodeInfo::new(0, "host-a");
        assert!(matches!(node.node_stat(), NodeStat::Idle));
    }
}
