//! Dispatcher metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a single dispatcher
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    /// Batches pulled from the transport
    batches_fetched: AtomicU64,
    /// Records pulled from the transport
    records_fetched: AtomicU64,
    /// Records handed to target queues
    records_delivered: AtomicU64,
    /// Records with no attached target
    records_unmatched: AtomicU64,
    /// Targets evicted by this dispatcher
    evictions: AtomicU64,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches_fetched(&self) -> u64 {
        self.batches_fetched.load(Ordering::Relaxed)
    }

    /// Record one fetched batch of `records` records
    pub fn inc_fetched(&self, records: usize) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
        self.records_fetched.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn records_fetched(&self) -> u64 {
        self.records_fetched.load(Ordering::Relaxed)
    }

    pub fn records_delivered(&self) -> u64 {
        self.records_delivered.load(Ordering::Relaxed)
    }

    pub fn add_delivered(&self, records: usize) {
        self.records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn records_unmatched(&self) -> u64 {
        self.records_unmatched.load(Ordering::Relaxed)
    }

    pub fn add_unmatched(&self, records: usize) {
        self.records_unmatched
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn inc_evictions(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_fetched: self.batches_fetched(),
            records_fetched: self.records_fetched(),
            records_delivered: self.records_delivered(),
            records_unmatched: self.records_unmatched(),
            evictions: self.evictions(),
        }
    }
}

/// Snapshot of dispatcher metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_fetched: u64,
    pub records_fetched: u64,
    pub records_delivered: u64,
    pub records_unmatched: u64,
    pub evictions: u64,
}

impl MetricsSnapshot {
    /// Sum two snapshots, used for per-manager totals
    pub fn merged(self, other: MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_fetched: self.batches_fetched + other.batches_fetched,
            records_fetched: self.records_fetched + other.records_fetched,
            records_delivered: self.records_delivered + other.records_delivered,
            records_unmatched: self.records_unmatched + other.records_unmatched,
            evictions: self.evictions + other.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = DispatcherMetrics::new();
        metrics.inc_fetched(3);
        metrics.inc_fetched(2);
        metrics.add_delivered(4);
        metrics.add_unmatched(1);
        metrics.inc_evictions();

        let snap = metrics.snapshot();
        assert_eq!(snap.batches_fetched, 2);
        assert_eq!(snap.records_fetched, 5);
        assert_eq!(snap.records_delivered, 4);
        assert_eq!(snap.records_unmatched, 1);
        assert_eq!(snap.evictions, 1);

        let total = snap.merged(snap);
        assert_eq!(total.records_fetched, 10);
    }
}
