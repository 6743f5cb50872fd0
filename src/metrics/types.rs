use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Point-in-time memory statistics of the running process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemStats {
    /// Live heap bytes.
    pub alloc_bytes: u64,
    /// Cumulative heap bytes allocated since start.
    pub total_alloc_bytes: u64,
    /// Resident set size.
    pub sys_bytes: u64,
    pub heap_alloc: u64,
    pub heap_idle: u64,
    pub heap_inuse: u64,
    pub heap_sys_bytes: u64,
    pub stack_inuse: u64,
    pub stack_sys_bytes: u64,
    /// Bytes handed back to the allocator.
    pub gc_sys_bytes: u64,
    /// Share of all CPUs used by the process, 0.0..=1.0.
    pub cpu_fraction: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Gauge,
    Count,
}

pub struct MemMetric {
    pub name: &'static str,
    pub aggregate: Aggregate,
    pub get: fn(&MemStats) -> f64,
}

/// Memory stats as of `captured_at`.
#[derive(Clone, Debug)]
pub struct MemSnapshot {
    pub stats: MemStats,
    pub captured_at: Instant,
}

impl MemSnapshot {
    pub fn new(stats: MemStats, captured_at: Instant) -> Self {
        MemSnapshot { stats, captured_at }
    }
}
