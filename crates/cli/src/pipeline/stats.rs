//! Simulation statistics.

use std::fmt;
use std::time::Duration;

use contracts::{ChannelName, PhysicalTopic, Position};
use dispatcher::{DetachReason, DispatchError};
use observability::DeliveryAggregator;

/// How a subscription ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The run ended before its start delay elapsed
    NotStarted,
    /// Received until the end of the run, then deregistered
    Completed,
    /// Closed by the dispatcher before the end of the run
    Detached(DetachReason),
    /// Registration failed
    Failed(DispatchError),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Completed => f.write_str("completed"),
            Self::Detached(reason) => write!(f, "detached ({reason})"),
            Self::Failed(err) => write!(f, "failed ({err})"),
        }
    }
}

/// What one subscriber observed
#[derive(Debug, Clone)]
pub struct SubscriptionReport {
    pub channel: ChannelName,
    pub topic: PhysicalTopic,
    /// Resolved start position, once registered
    pub start: Option<Position>,
    pub outcome: Outcome,
    pub delivery: DeliveryAggregator,
}

impl SubscriptionReport {
    pub fn new(channel: ChannelName, topic: PhysicalTopic) -> Self {
        Self {
            channel,
            topic,
            start: None,
            outcome: Outcome::NotStarted,
            delivery: DeliveryAggregator::new(),
        }
    }

    /// First batch began at the start position and every batch chained
    pub fn is_consistent(&self) -> bool {
        let starts_right = match (self.start, self.delivery.first_begin) {
            (Some(start), Some(begin)) => start == begin,
            _ => true,
        };
        starts_right && self.delivery.is_contiguous()
    }
}

/// Statistics from a simulation run
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub duration: Duration,

    /// Records written, prefill included
    pub records_produced: u64,

    /// Records dropped by retention
    pub records_trimmed: u64,

    /// Transport consumers opened over the run
    pub consumers_opened: u64,

    /// Most dispatchers alive at one sample
    pub peak_dispatchers: usize,

    pub subscriptions: Vec<SubscriptionReport>,
}

impl SimulationStats {
    /// Records delivered per second, over all subscribers
    pub fn delivered_per_sec(&self) -> f64 {
        let delivered: u64 = self
            .subscriptions
            .iter()
            .map(|s| s.delivery.total_records)
            .sum();
        if self.duration.as_secs_f64() > 0.0 {
            delivered as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn inconsistent(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| !s.is_consistent())
            .count()
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                   Simulation Statistics                      ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Records produced: {}", self.records_produced);
        println!("   ├─ Records trimmed: {}", self.records_trimmed);
        println!("   ├─ Consumers opened: {}", self.consumers_opened);
        println!("   ├─ Peak dispatchers: {}", self.peak_dispatchers);
        println!("   └─ Delivered/s: {:.1}", self.delivered_per_sec());

        println!("\n📥 Subscriptions ({})", self.subscriptions.len());
        for (i, report) in self.subscriptions.iter().enumerate() {
            let is_last = i == self.subscriptions.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            let child = if is_last { "   " } else { "│  " };
            let summary = report.delivery.summary();

            println!("   {} {} on {} [{}]", prefix, report.channel, report.topic, report.outcome);
            match report.start {
                Some(start) => println!("   {}  ├─ Start: {}", child, start),
                None => println!("   {}  ├─ Start: -", child),
            }
            println!(
                "   {}  ├─ Batches: {} ({} empty), records: {}",
                child, summary.total_batches, summary.empty_batches, summary.total_records
            );
            println!("   {}  ├─ Lag: {}", child, summary.lag);
            let continuity = if report.is_consistent() { "ok" } else { "BROKEN" };
            println!(
                "   {}  └─ Continuity: {} (gaps {}, overlaps {})",
                child, continuity, summary.gaps, summary.overlaps
            );
        }

        println!();
    }
}
