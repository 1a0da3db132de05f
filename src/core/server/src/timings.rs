// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const BUCKETS: usize = 32;

/// Lock-free per-opcode latency histograms with power-of-two nanosecond
/// buckets. One instance per bucket; updated with relaxed atomics on the
/// hot path.
pub struct CommandTimings {
    histograms: Vec<Histogram>,
}

struct Histogram {
    count: AtomicU64,
    total_ns: AtomicU64,
    buckets: [AtomicU64; BUCKETS],
}

impl Histogram {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn record(&self, ns: u64) {
        let index = std::cmp::min((64 - ns.leading_zeros()) as usize, BUCKETS - 1);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
    }
}

impl CommandTimings {
    pub fn new() -> Self {
        Self {
            histograms: (0..256).map(|_| Histogram::new()).collect(),
        }
    }

    pub fn record(&self, opcode: u8, elapsed: Duration) {
        self.histograms[opcode as usize].record(elapsed.as_nanos() as u64);
    }

    pub fn count(&self, opcode: u8) -> u64 {
        self.histograms[opcode as usize].count.load(Ordering::Relaxed)
    }

    /// Dump one opcode's histogram for the command-timer diagnostics
    /// command.
    pub fn to_json(&self, opcode: u8) -> serde_json::Value {
        let h = &self.histograms[opcode as usize];
        let buckets: Vec<u64> = h.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        serde_json::json!({
            "count": h.count.load(Ordering::Relaxed),
            "total_ns": h.total_ns.load(Ordering::Relaxed),
            "buckets_ns_log2": buckets,
        })
    }
}

impl Default for CommandTimings {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduling-time tracking for a worker thread.
#[derive(Debug, Default)]
pub struct SchedTimes {
    pub min_ns: AtomicU64,
    pub max_ns: AtomicU64,
    pub total_ns: AtomicU64,
    pub count: AtomicU64,
}

impl SchedTimes {
    pub fn record(&self, ns: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |min| {
                if min == 0 || ns < min {
                    Some(ns)
                } else {
                    None
                }
            })
            .ok();
        self.max_ns
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |max| {
                if ns > max {
                    Some(ns)
                } else {
                    None
                }
            })
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_into_log2_buckets() {
        let timings = CommandTimings::new();
        timings.record(0x00, Duration::from_nanos(1));
        timings.record(0x00, Duration::from_nanos(1000));
        timings.record(0x00, Duration::from_micros(100));
        assert_eq!(timings.count(0x00), 3);
        assert_eq!(timings.count(0x01), 0);

        let json = timings.to_json(0x00);
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn sched_max_tracks_maximum() {
        let sched = SchedTimes::default();
        sched.record(100);
        sched.record(50);
        sched.record(200);
        assert_eq!(sched.min_ns.load(Ordering::Relaxed), 50);
        assert_eq!(sched.max_ns.load(Ordering::Relaxed), 200);
        assert_eq!(sched.count.load(Ordering::Relaxed), 3);
    }
}
