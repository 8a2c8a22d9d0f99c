//! Transport configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory transport configuration
#[derive(Debug, Clone)]
pub struct MemoryTransportConfig {
    /// Upper bound on records per fetched batch
    pub max_batch_size: usize,

    /// Keep at most this many records per topic (None = unbounded)
    pub retention: Option<u64>,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 256,
            retention: None,
        }
    }
}

impl MemoryTransportConfig {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            ..Default::default()
        }
    }

    /// Set retention limit
    pub fn with_retention(mut self, retention: u64) -> Self {
        self.retention = Some(retention);
        self
    }
}

/// Transport metrics
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// Records appended across all topics
    pub records_appended: AtomicU64,

    /// Records trimmed by retention
    pub records_trimmed: AtomicU64,

    /// Batches handed to consumers
    pub batches_fetched: AtomicU64,

    /// Consumers opened
    pub subscriptions: AtomicU64,

    /// Consumers currently open
    pub open_consumers: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trimmed(&self, count: u64) {
        self.records_trimmed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fetched(&self) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opened(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        self.open_consumers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.open_consumers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_trimmed: self.records_trimmed.load(Ordering::Relaxed),
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            open_consumers: self.open_consumers.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_appended: u64,
    pub records_trimmed: u64,
    pub batches_fetched: u64,
    pub subscriptions: u64,
    pub open_consumers: u64,
}
