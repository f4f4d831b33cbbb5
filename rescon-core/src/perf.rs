//! Dispatch Metrics
//!
//! Lightweight counters for the blocking I/O gate: how many operations ran
//! directly on the calling unit, how many were offloaded to the async
//! adapter, and what each path cost.
//!
//! # Design Goals:
//! - Lock-free atomic counters
//! - Zero-allocation in hot paths
//! - Recording through a drop-based scoped timer

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters for one [`IoDispatchGate`](crate::io::gate::IoDispatchGate).
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    // Direct path
    pub direct_ops: AtomicU64,
    pub direct_time_ns: AtomicU64,

    // Offloaded path
    pub offloaded_ops: AtomicU64,
    pub offload_time_ns: AtomicU64,

    // Failures
    pub adapter_failures: AtomicU64,
    pub io_errors: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record an operation executed on the calling unit
    pub fn record_direct(&self, duration: Duration) {
        self.direct_ops.fetch_add(1, Ordering::Relaxed);
        self.direct_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record an operation submitted to the adapter
    pub fn record_offload(&self, duration: Duration) {
        self.offloaded_ops.fetch_add(1, Ordering::Relaxed);
        self.offload_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record an adapter that failed to run a submitted operation
    pub fn record_adapter_failure(&self) {
        self.adapter_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation that itself returned an error
    pub fn record_io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        let direct_ops = self.direct_ops.load(Ordering::Relaxed);
        let offloaded_ops = self.offloaded_ops.load(Ordering::Relaxed);
        DispatchSnapshot {
            direct_ops,
            avg_direct_us: avg_us(direct_ops, &self.direct_time_ns),
            offloaded_ops,
            avg_offload_us: avg_us(offloaded_ops, &self.offload_time_ns),
            offload_rate: rate(offloaded_ops, direct_ops + offloaded_ops),
            adapter_failures: self.adapter_failures.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.direct_ops.store(0, Ordering::Relaxed);
        self.direct_time_ns.store(0, Ordering::Relaxed);
        self.offloaded_ops.store(0, Ordering::Relaxed);
        self.offload_time_ns.store(0, Ordering::Relaxed);
        self.adapter_failures.store(0, Ordering::Relaxed);
        self.io_errors.store(0, Ordering::Relaxed);
    }
}

fn avg_us(count: u64, total_ns: &AtomicU64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (total_ns.load(Ordering::Relaxed) as f64) / (count as f64) / 1_000.0
}

/// Percentage of `part` in `total`.
fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64) / (total as f64) * 100.0
}

/// A point-in-time snapshot of dispatch metrics
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSnapshot {
    pub direct_ops: u64,
    pub avg_direct_us: f64,
    pub offloaded_ops: u64,
    pub avg_offload_us: f64,
    pub offload_rate: f64,
    pub adapter_failures: u64,
    pub io_errors: u64,
}

/// A scoped timer that records its duration on drop
pub struct ScopedTimer<'a> {
    start: Instant,
    metrics: &'a DispatchMetrics,
    path: DispatchPath,
}

/// Which side of the gate an operation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    Direct,
    Offloaded,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(metrics: &'a DispatchMetrics, path: DispatchPath) -> Self {
        Self {
            start: Instant::now(),
            metrics,
            path,
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        match self.path {
            DispatchPath::Direct => self.metrics.record_direct(duration),
            DispatchPath::Offloaded => self.metrics.record_offload(duration),
        }
    }
}
