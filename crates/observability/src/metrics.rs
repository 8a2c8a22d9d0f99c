//! Subscriber-side delivery metrics
//!
//! Prometheus helpers for what subscribers observe, plus an in-memory
//! aggregator that checks batch continuity and summarises a run.

use contracts::{Position, RecordBatch};
use dispatcher::ManagerStats;
use metrics::{counter, gauge, histogram};

/// Record one batch received by a subscriber
///
/// `lag` is the distance between the topic head and the batch end.
pub fn record_batch_received(channel: &str, batch: &RecordBatch, lag: u64) {
    counter!("msgfan_subscriber_batches_total", "channel" => channel.to_string()).increment(1);
    counter!("msgfan_subscriber_records_total", "channel" => channel.to_string())
        .increment(batch.records.len() as u64);
    gauge!("msgfan_subscriber_position", "channel" => channel.to_string())
        .set(batch.end.offset() as f64);
    histogram!("msgfan_subscriber_lag", "channel" => channel.to_string()).record(lag as f64);
}

/// Record the outcome of a registration attempt
pub fn record_registration(topic: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "msgfan_registrations_total",
        "topic" => topic.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a subscriber's queue being closed by the dispatcher
pub fn record_subscriber_detached(channel: &str, reason: &str) {
    counter!(
        "msgfan_subscribers_detached_total",
        "channel" => channel.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Publish a manager snapshot as per-topic gauges
pub fn record_manager_stats(stats: &ManagerStats) {
    let topic = stats.topic.to_string();
    gauge!("msgfan_manager_targets", "topic" => topic.clone()).set(stats.targets as f64);
    gauge!("msgfan_manager_pending", "topic" => topic.clone()).set(stats.pending as f64);
    gauge!("msgfan_manager_dispatchers", "topic" => topic.clone()).set(stats.dispatchers() as f64);
    if let Some(main) = &stats.main {
        gauge!("msgfan_manager_main_cursor", "topic" => topic).set(main.cursor.offset() as f64);
    }
}

/// Per-subscription delivery aggregator
///
/// Tracks the chain of `(begin, end]` ranges so a run can report gaps or
/// overlaps, next to batch size and lag statistics.
#[derive(Debug, Clone, Default)]
pub struct DeliveryAggregator {
    /// Start checkpoint of the first batch
    pub first_begin: Option<Position>,

    /// End of the last batch
    pub last_end: Option<Position>,

    pub total_batches: u64,
    pub total_records: u64,
    pub empty_batches: u64,

    /// Batches whose `begin` was past the previous `end`
    pub gaps: u64,

    /// Batches whose `begin` was before the previous `end`
    pub overlaps: u64,

    pub batch_size: RunningStats,
    pub lag: RunningStats,
}

impl DeliveryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, batch: &RecordBatch, lag: u64) {
        if let Some(prev) = self.last_end {
            if batch.begin > prev {
                self.gaps += 1;
            } else if batch.begin < prev {
                self.overlaps += 1;
            }
        } else {
            self.first_begin = Some(batch.begin);
        }
        self.last_end = Some(batch.end);

        self.total_batches += 1;
        self.total_records += batch.records.len() as u64;
        if batch.records.is_empty() {
            self.empty_batches += 1;
        }
        self.batch_size.push(batch.records.len() as f64);
        self.lag.push(lag as f64);
    }

    /// Whether every batch continued exactly where the previous one ended
    pub fn is_contiguous(&self) -> bool {
        self.gaps == 0 && self.overlaps == 0
    }

    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            first_begin: self.first_begin,
            last_end: self.last_end,
            total_batches: self.total_batches,
            total_records: self.total_records,
            empty_batches: self.empty_batches,
            gaps: self.gaps,
            overlaps: self.overlaps,
            batch_size: StatsSummary::from(&self.batch_size),
            lag: StatsSummary::from(&self.lag),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Delivery summary for one subscription
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub first_begin: Option<Position>,
    pub last_end: Option<Position>,
    pub total_batches: u64,
    pub total_records: u64,
    pub empty_batches: u64,
    pub gaps: u64,
    pub overlaps: u64,
    pub batch_size: StatsSummary,
    pub lag: StatsSummary,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.first_begin, self.last_end) {
            (Some(begin), Some(end)) => writeln!(f, "Range: ({begin}, {end}]")?,
            _ => writeln!(f, "Range: none")?,
        }
        writeln!(
            f,
            "Batches: {} ({} empty)",
            self.total_batches, self.empty_batches
        )?;
        writeln!(f, "Records: {}", self.total_records)?;
        writeln!(f, "Gaps: {}, overlaps: {}", self.gaps, self.overlaps)?;
        writeln!(f, "Batch size: {}", self.batch_size)?;
        writeln!(f, "Lag (offsets): {}", self.lag)?;
        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.mean }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
