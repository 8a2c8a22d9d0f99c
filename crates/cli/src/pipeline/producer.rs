//! Synthetic producer writing round-robin over each topic's channels.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use contracts::{ChannelName, PhysicalTopic, Position, TopicConfig};
use transport::MemoryTransport;

/// Producer wake-up period; the rate is spread over these ticks
const PRODUCER_TICK: Duration = Duration::from_millis(10);

struct TopicWriter {
    topic: PhysicalTopic,
    channels: Vec<ChannelName>,
    retention: Option<u64>,
    next_channel: usize,
}

pub struct Producer {
    transport: MemoryTransport,
    writers: Vec<TopicWriter>,
    payload: Bytes,
    produced: u64,
}

impl Producer {
    pub fn new(transport: MemoryTransport, topics: &[TopicConfig], payload_bytes: usize) -> Self {
        let writers = topics
            .iter()
            .map(|t| TopicWriter {
                topic: PhysicalTopic::new(&t.name),
                channels: t.channels.clone(),
                retention: t.retention,
                next_channel: 0,
            })
            .collect();

        Self {
            transport,
            writers,
            payload: Bytes::from(vec![0u8; payload_bytes]),
            produced: 0,
        }
    }

    /// Write each topic's `prefill` records before anyone subscribes
    pub fn prefill(&mut self, topics: &[TopicConfig]) {
        for (idx, topic) in topics.iter().enumerate() {
            for _ in 0..topic.prefill {
                self.append(idx);
            }
            if topic.prefill > 0 {
                info!(topic = %topic.name, records = topic.prefill, "Topic prefilled");
            }
        }
    }

    /// Produce at `rate` records per second per topic until cancelled
    ///
    /// Returns the total number of records written, prefill included.
    pub async fn run(mut self, rate: f64, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(PRODUCER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let per_tick = rate * PRODUCER_TICK.as_secs_f64();
        let mut owed = 0.0_f64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    owed += per_tick;
                    let due = owed.floor();
                    owed -= due;
                    for _ in 0..due as u64 {
                        for idx in 0..self.writers.len() {
                            self.append(idx);
                        }
                    }
                }
            }
        }

        debug!(produced = self.produced, "Producer stopped");
        self.produced
    }

    fn append(&mut self, idx: usize) {
        let writer = &mut self.writers[idx];
        let channel = writer.channels[writer.next_channel % writer.channels.len()].clone();
        writer.next_channel = writer.next_channel.wrapping_add(1);

        let position = self
            .transport
            .append(writer.topic.clone(), channel, self.payload.clone());
        self.produced += 1;

        if let Some(retention) = writer.retention {
            if position.offset() > retention {
                let through = Position::new(position.offset() - retention);
                self.transport.trim_before(&writer.topic, through);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(prefill: u64, retention: Option<u64>) -> TopicConfig {
        TopicConfig {
            name: "p0".into(),
            channels: vec!["p0_v1".into(), "p0_v2".into()],
            prefill,
            retention,
        }
    }

    #[test]
    fn test_prefill_round_robin() {
        let transport = MemoryTransport::default();
        let topics = vec![topic(4, None)];
        let mut producer = Producer::new(transport.clone(), &topics, 8);
        producer.prefill(&topics);

        let bounds = transport.bounds(&"p0".into());
        assert_eq!(bounds.earliest, Position::ZERO);
        assert_eq!(bounds.latest, Position::new(4));
        assert_eq!(producer.produced, 4);
    }

    #[test]
    fn test_retention_trims_oldest() {
        let transport = MemoryTransport::default();
        let topics = vec![topic(10, Some(3))];
        let mut producer = Producer::new(transport.clone(), &topics, 0);
        producer.prefill(&topics);

        let bounds = transport.bounds(&"p0".into());
        assert_eq!(bounds.earliest, Position::new(7));
        assert_eq!(bounds.latest, Position::new(10));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let transport = MemoryTransport::default();
        let topics = vec![topic(0, None)];
        let producer = Producer::new(transport.clone(), &topics, 1);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(producer.run(1_000.0, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let produced = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(produced > 0);
        assert_eq!(transport.bounds(&"p0".into()).latest, Position::new(produced));
    }
}
