//! Observation surface: counters, gauges, and a coarse health probe.
//!
//! No metrics-exporter crate is pulled in here — this module hand-rolls
//! atomics-based counters and running-average histograms, matching the
//! teacher's existing "plain struct snapshot read under the engine's lock"
//! pattern in `Engine::stats`. Exporting these numbers to Prometheus, an
//! HTTP endpoint, or anywhere else is left to an external collaborator.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Running count/sum/max for a single operation's latency, in nanoseconds.
///
/// This is a coarse approximation of a histogram — enough to report mean
/// and max latency. Percentile estimation needs a real histogram library
/// and is explicitly out of scope (external metrics collaborator).
#[derive(Debug, Default)]
pub struct LatencyStats {
    count: AtomicU64,
    sum_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl LatencyStats {
    pub fn record(&self, duration: std::time::Duration) {
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum_nanos = self.sum_nanos.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            mean_nanos: if count == 0 { 0 } else { sum_nanos / count },
            max_nanos: self.max_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a [`LatencyStats`] counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_nanos: u64,
    pub max_nanos: u64,
}

/// Monotonic counters and gauges tracked across the engine's lifetime.
///
/// Cheap to update (relaxed atomics) from any operation without taking the
/// engine's `RwLock`; `EngineStats`/`health()` read a consistent-enough
/// snapshot for observability purposes, not transactional accounting.
#[derive(Debug, Default)]
pub struct Metrics {
    pub puts: AtomicU64,
    pub deletes: AtomicU64,
    pub scans: AtomicU64,
    pub wal_appends: AtomicU64,
    pub bloom_hits: AtomicU64,
    pub bloom_misses: AtomicU64,
    pub compactions: AtomicU64,

    pub put_latency: LatencyStats,
    pub get_latency: LatencyStats,
    pub scan_latency: LatencyStats,
    pub flush_latency: LatencyStats,
    pub compaction_latency: LatencyStats,

    pub is_compacting: AtomicBool,
}

impl Metrics {
    pub fn record_bloom(&self, hit: bool) {
        if hit {
            self.bloom_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bloom_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Coarse health classification, analogous to a Kubernetes readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Engine is accepting writes and reads normally.
    Healthy,
    /// Engine is operating but under strain (e.g. L0 well past its
    /// compaction trigger, or compaction has been unable to keep up).
    Degraded,
    /// Engine has transitioned to read-only mode (e.g. disk full).
    Unhealthy,
}

/// Snapshot returned by [`Engine::health`](super::Engine::health).
#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub status: HealthStatus,
    pub read_only: bool,
    pub l0_file_count: usize,
    pub l0_compaction_trigger: usize,
}

pub fn classify(read_only: bool, l0_file_count: usize, l0_compaction_trigger: usize) -> Health {
    let status = if read_only {
        HealthStatus::Unhealthy
    } else if l0_file_count > l0_compaction_trigger * 2 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    Health {
        status,
        read_only,
        l0_file_count,
        l0_compaction_trigger,
    }
}
