// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Supporting metrics: a bounded resampling time series and `/proc`-backed
//! system usage probes (§4.10).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded-duration deque of `(timestamp, value)` pairs (§4.10 `ValueTimeTracker`).
pub struct ValueTimeTracker {
    keep_duration: Duration,
    samples: VecDeque<(Instant, f32)>,
}

impl ValueTimeTracker {
    pub fn new(keep_duration: Duration) -> Self {
        Self { keep_duration, samples: VecDeque::new() }
    }

    /// Append `value` at the current time, evicting anything older than
    /// `keep_duration`.
    pub fn push(&mut self, value: f32) {
        self.push_at(Instant::now(), value);
    }

    fn push_at(&mut self, now: Instant, value: f32) {
        self.samples.push_back((now, value));
        while let Some(&(ts, _)) = self.samples.front() {
            if now.duration_since(ts) > self.keep_duration {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// `N` per-bucket averages over the retained window, bucket width
    /// `keep_duration / N` (§4.10). Empty buckets fall back to `0.0`.
    pub fn resample(&self, n: usize) -> Vec<f32> {
        if n == 0 || self.samples.is_empty() {
            return vec![0.0; n];
        }
        let now = self.samples.back().unwrap().0;
        let window_start = now - self.keep_duration;
        let bucket_width = self.keep_duration.as_secs_f64() / n as f64;

        let mut sums = vec![0.0f64; n];
        let mut counts = vec![0u32; n];
        for &(ts, value) in &self.samples {
            if ts < window_start {
                continue;
            }
            let offset = ts.duration_since(window_start).as_secs_f64();
            let bucket = ((offset / bucket_width) as usize).min(n - 1);
            sums[bucket] += value as f64;
            counts[bucket] += 1;
        }

        sums.iter()
            .zip(&counts)
            .map(|(&sum, &count)| if count == 0 { 0.0 } else { (sum / count as f64) as f32 })
            .collect()
    }
}

/// One reading of CPU tick counters for a single `/proc/stat` row.
#[derive(Debug, Clone, Copy, Default)]
struct CpuTicks {
    idle: u64,
    total: u64,
}

/// Per-core and aggregate CPU usage, derived from successive `/proc/stat`
/// reads (§4.10 `SysUsage`).
pub struct SysUsage {
    prev_aggregate: Option<CpuTicks>,
    prev_per_core: Vec<CpuTicks>,
    prev_net: Option<(Instant, u64, u64)>,
    min_tick_delta: u64,
}

impl Default for SysUsage {
    fn default() -> Self {
        Self::new()
    }
}

impl SysUsage {
    pub fn new() -> Self {
        Self { prev_aggregate: None, prev_per_core: Vec::new(), prev_net: None, min_tick_delta: 2 }
    }

    /// Parse `/proc/stat`'s `cpu` lines and update the fraction-busy
    /// estimate. Returns `None` until at least `min_tick_delta` ticks have
    /// accrued since the previous read (§4.10: "refusing to report until a
    /// small tick delta has accrued").
    pub fn update_cpu(&mut self, proc_stat: &str) -> Option<(f32, Vec<f32>)> {
        let mut aggregate = None;
        let mut per_core = Vec::new();
        for line in proc_stat.lines() {
            let Some(rest) = line.strip_prefix("cpu") else { break };
            let ticks = parse_cpu_ticks(rest)?;
            if rest.starts_with(' ') {
                aggregate = Some(ticks);
            } else {
                per_core.push(ticks);
            }
        }
        let aggregate = aggregate?;

        let agg_fraction = self.prev_aggregate.and_then(|prev| fraction_busy(prev, aggregate, self.min_tick_delta));
        self.prev_aggregate = Some(aggregate);

        if self.prev_per_core.len() != per_core.len() {
            self.prev_per_core = per_core.clone();
            return None;
        }
        let mut per_core_fractions = Vec::with_capacity(per_core.len());
        for (prev, curr) in self.prev_per_core.iter().zip(&per_core) {
            per_core_fractions.push(fraction_busy(*prev, *curr, self.min_tick_delta).unwrap_or(0.0));
        }
        self.prev_per_core = per_core;

        agg_fraction.map(|f| (f, per_core_fractions))
    }

    /// Parse `/proc/net/dev`, pick the row with the largest combined
    /// rx+tx byte counter, and compute bytes/sec since the previous
    /// successful update (§4.10 `updateNetIO`).
    pub fn update_net_io(&mut self, proc_net_dev: &str) -> Option<(f64, f64)> {
        let mut best: Option<(u64, u64)> = None;
        for line in proc_net_dev.lines().skip(2) {
            let Some((_iface, rest)) = line.split_once(':') else { continue };
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() < 9 {
                continue;
            }
            let rx: u64 = fields[0].parse().ok()?;
            let tx: u64 = fields[8].parse().ok()?;
            if best.map(|(r, t)| rx + tx > r + t).unwrap_or(true) {
                best = Some((rx, tx));
            }
        }
        let (rx, tx) = best?;
        let now = Instant::now();

        let result = self.prev_net.map(|(prev_ts, prev_rx, prev_tx)| {
            let dt = now.duration_since(prev_ts).as_secs_f64().max(f64::EPSILON);
            ((rx.saturating_sub(prev_rx)) as f64 / dt, (tx.saturating_sub(prev_tx)) as f64 / dt)
        });
        self.prev_net = Some((now, rx, tx));
        result
    }

    /// Parse `/proc/meminfo`'s `MemTotal`/`MemAvailable` lines (kB) and
    /// return the fraction of memory in use, `None` if either is missing or
    /// `MemTotal` is zero (§4.10 `getMemUsage`).
    pub fn update_mem(&mut self, proc_meminfo: &str) -> Option<f32> {
        let mut mem_total_kb = None;
        let mut mem_available_kb = None;
        for line in proc_meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                mem_total_kb = parse_meminfo_kb(rest);
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                mem_available_kb = parse_meminfo_kb(rest);
            }
        }
        let total = mem_total_kb?;
        let available = mem_available_kb?;
        if total == 0 {
            return None;
        }
        Some(1.0 - (available as f32 / total as f32))
    }
}

fn parse_meminfo_kb(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse().ok()
}

fn parse_cpu_ticks(rest: &str) -> Option<CpuTicks> {
    let fields: Vec<u64> = rest.split_whitespace().map(|t| t.parse().ok()).collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();
    Some(CpuTicks { idle, total })
}

fn fraction_busy(prev: CpuTicks, curr: CpuTicks, min_tick_delta: u64) -> Option<f32> {
    let total_delta = curr.total.saturating_sub(prev.total);
    if total_delta < min_tick_delta {
        return None;
    }
    let idle_delta = curr.idle.saturating_sub(prev.idle);
    Some(1.0 - (idle_delta as f32 / total_delta as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_empty_tracker_returns_zeros() {
        let tracker = ValueTimeTracker::new(Duration::from_secs(10));
        assert_eq!(tracker.resample(4), vec![0.0; 4]);
    }

    #[test]
    fn resample_single_sample_falls_in_its_bucket() {
        let mut tracker = ValueTimeTracker::new(Duration::from_secs(10));
        let t0 = Instant::now();
        tracker.push_at(t0, 5.0);
        let resampled = tracker.resample(4);
        assert!(resampled.iter().any(|&v| v == 5.0));
    }

    #[test]
    fn cpu_ticks_require_warm_up_before_reporting() {
        let mut usage = SysUsage::new();
        let stat1 = "cpu  100 0 100 800 0 0 0 0 0 0\ncpu0 100 0 100 800 0 0 0 0 0 0\n";
        assert!(usage.update_cpu(stat1).is_none());
        let stat2 = "cpu  110 0 110 880 0 0 0 0 0 0\ncpu0 110 0 110 880 0 0 0 0 0 0\n";
        let (agg, per_core) = usage.update_cpu(stat2).unwrap();
        assert!(agg > 0.0 && agg < 1.0);
        assert_eq!(per_core.len(), 1);
    }

    #[test]
    fn net_io_picks_largest_interface_and_computes_rate() {
        let mut usage = SysUsage::new();
        let dev1 = "Inter-|   Receive\n face |bytes packets errs drop fifo frame compressed multicast|bytes\nlo: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\neth0: 5000 10 0 0 0 0 0 0 2000 5 0 0 0 0 0 0\n";
        assert!(usage.update_net_io(dev1).is_none());
        std::thread::sleep(Duration::from_millis(5));
        let dev2 = "Inter-|   Receive\n face |bytes packets errs drop fifo frame compressed multicast|bytes\nlo: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\neth0: 6000 12 0 0 0 0 0 0 2500 6 0 0 0 0 0 0\n";
        let (rx_rate, tx_rate) = usage.update_net_io(dev2).unwrap();
        assert!(rx_rate > 0.0);
        assert!(tx_rate > 0.0);
    }

    #[test]
    fn mem_usage_fraction_from_total_and_available() {
        let mut usage = SysUsage::new();
        let meminfo = "MemTotal:        1000000 kB\nMemFree:          100000 kB\nMemAvailable:     250000 kB\n";
        let fraction = usage.update_mem(meminfo).unwrap();
        assert!((fraction - 0.75).abs() < 1e-6);
    }

    #[test]
    fn mem_usage_missing_fields_returns_none() {
        let mut usage = SysUsage::new();
        assert!(usage.update_mem("MemTotal:        1000000 kB\n").is_none());
    }
}
