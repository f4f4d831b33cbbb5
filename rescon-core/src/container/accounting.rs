//! Consumption accounting seam.
//!
//! Containers never meter anything themselves. A host-side accountant
//! (cgroup reader, scheduler tick hook, test double) owns the numbers and a
//! container only reads them through [`Accountant`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::limits::ResourceType;

/// Supplies consumption figures for one container.
pub trait Accountant: Send + Sync {
    /// Amount of `resource` consumed so far, in the resource's unit.
    fn consumed_amount(&self, resource: ResourceType) -> u64;
}

/// Lock-free per-resource counters.
///
/// The default accountant of every container. The collaborator that does the
/// metering keeps a clone of the `Arc` and feeds it with [`add`](Self::add)
/// or [`set`](Self::set); observers read concurrently.
#[derive(Debug, Default)]
pub struct UsageCounters {
    counters: [AtomicU64; ResourceType::ALL.len()],
}

impl UsageCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add `amount` to the counter for `resource`.
    pub fn add(&self, resource: ResourceType, amount: u64) {
        self.slot(resource).fetch_add(amount, Ordering::Relaxed);
    }

    /// Overwrite the counter for `resource`.
    pub fn set(&self, resource: ResourceType, amount: u64) {
        self.slot(resource).store(amount, Ordering::Relaxed);
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn slot(&self, resource: ResourceType) -> &AtomicU64 {
        // Discriminants follow the declaration order of `ResourceType::ALL`.
        &self.counters[resource as usize]
    }
}

impl Accountant for UsageCounters {
    fn consumed_amount(&self, resource: ResourceType) -> u64 {
        self.slot(resource).load(Ordering::Relaxed)
    }
}
