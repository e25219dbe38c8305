//! Lock-free kernel counters.
//!
//! All counters use [`AtomicU64`] with [`Ordering::Relaxed`]; they are
//! monotonic with no causal dependencies, so relaxed ordering avoids
//! memory fences on weak-memory architectures. For a point-in-time view
//! suitable for a stats endpoint, call [`KernelMetrics::snapshot()`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const ORD: Ordering = Ordering::Relaxed;

/// Shared, lock-free counters covering the store, scheduler, and registry.
///
/// Intended to be wrapped in an `Arc` and handed to each kernel component.
#[derive(Debug, Default)]
pub struct KernelMetrics {
    /// Writes that changed state or attributes and were committed.
    writes_committed: AtomicU64,
    /// Writes that changed nothing and were dropped (no force_update).
    writes_deduplicated: AtomicU64,
    /// Listener invocations delivered during fan-out.
    notifications_delivered: AtomicU64,
    /// Listeners that panicked during fan-out (caught and skipped).
    listener_failures: AtomicU64,
    /// Scheduled tasks whose callback ran to completion.
    tasks_fired: AtomicU64,
    /// Scheduled tasks whose callback panicked (caught and logged).
    task_failures: AtomicU64,
    /// Per-target service invocations dispatched through the registry.
    service_calls: AtomicU64,
    /// Per-target service invocations that failed.
    service_failures: AtomicU64,
}

impl KernelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_write(&self) {
        self.writes_committed.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_dedup(&self) {
        self.writes_deduplicated.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_notification(&self) {
        self.notifications_delivered.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_listener_failure(&self) {
        self.listener_failures.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_task_fired(&self) {
        self.tasks_fired.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_task_failure(&self) {
        self.task_failures.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_service_call(&self) {
        self.service_calls.fetch_add(1, ORD);
    }

    #[inline]
    pub(crate) fn record_service_failure(&self) {
        self.service_failures.fetch_add(1, ORD);
    }

    pub fn writes_committed(&self) -> u64 {
        self.writes_committed.load(ORD)
    }

    pub fn writes_deduplicated(&self) -> u64 {
        self.writes_deduplicated.load(ORD)
    }

    pub fn notifications_delivered(&self) -> u64 {
        self.notifications_delivered.load(ORD)
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(ORD)
    }

    pub fn tasks_fired(&self) -> u64 {
        self.tasks_fired.load(ORD)
    }

    pub fn task_failures(&self) -> u64 {
        self.task_failures.load(ORD)
    }

    pub fn service_calls(&self) -> u64 {
        self.service_calls.load(ORD)
    }

    pub fn service_failures(&self) -> u64 {
        self.service_failures.load(ORD)
    }

    /// Point-in-time snapshot of all counters.
    ///
    /// Individual reads are atomic but the snapshot as a whole is not
    /// transactional; slight skew between counters is acceptable for
    /// stats reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes_committed: self.writes_committed(),
            writes_deduplicated: self.writes_deduplicated(),
            notifications_delivered: self.notifications_delivered(),
            listener_failures: self.listener_failures(),
            tasks_fired: self.tasks_fired(),
            task_failures: self.task_failures(),
            service_calls: self.service_calls(),
            service_failures: self.service_failures(),
        }
    }
}

/// Serializable snapshot of [`KernelMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub writes_committed: u64,
    pub writes_deduplicated: u64,
    pub notifications_delivered: u64,
    pub listener_failures: u64,
    pub tasks_fired: u64,
    pub task_failures: u64,
    pub service_calls: u64,
    pub service_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = KernelMetrics::new();
        let s = m.snapshot();
        assert_eq!(s.writes_committed, 0);
        assert_eq!(s.tasks_fired, 0);
        assert_eq!(s.service_calls, 0);
    }

    #[test]
    fn record_and_snapshot() {
        let m = KernelMetrics::new();
        m.record_write();
        m.record_write();
        m.record_dedup();
        m.record_notification();
        m.record_task_fired();
        m.record_task_failure();

        let s = m.snapshot();
        assert_eq!(s.writes_committed, 2);
        assert_eq!(s.writes_deduplicated, 1);
        assert_eq!(s.notifications_delivered, 1);
        assert_eq!(s.tasks_fired, 1);
        assert_eq!(s.task_failures, 1);

        let json = serde_json::to_string(&s).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
