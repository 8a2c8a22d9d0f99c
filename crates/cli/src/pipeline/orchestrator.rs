//! Simulation orchestrator - wires producer, client and subscribers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{Position, SimulationProfile, SubscriptionConfig};
use dispatcher::DispatchClient;
use observability::{
    record_batch_received, record_manager_stats, record_registration, record_subscriber_detached,
};
use transport::{MemoryTransport, MemoryTransportConfig};

use super::producer::Producer;
use super::stats::{Outcome, SimulationStats, SubscriptionReport};
use crate::error::{CliError, Result};

type Client = DispatchClient<MemoryTransport>;

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub profile: SimulationProfile,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Runs one profile to completion
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run for the profile's duration, then tear everything down
    #[instrument(name = "simulation_run", skip(self))]
    pub async fn run(self) -> Result<SimulationStats> {
        let start_time = Instant::now();
        let profile = &self.config.profile;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let transport = MemoryTransport::new(MemoryTransportConfig::new(
            profile.dispatch.max_batch_size,
        ));

        let mut producer = Producer::new(
            transport.clone(),
            &profile.topics,
            profile.producer.payload_bytes,
        );
        producer.prefill(&profile.topics);

        let client = Arc::new(
            DispatchClient::builder(transport.clone())
                .config(profile.dispatch.clone())
                .build(),
        );
        let cancel = CancellationToken::new();

        info!(
            topics = profile.topics.len(),
            subscriptions = profile.subscriptions.len(),
            rate = profile.producer.records_per_second,
            duration_ms = profile.duration_ms,
            "Simulation running"
        );

        let producer_task = tokio::spawn(
            producer.run(profile.producer.records_per_second, cancel.clone()),
        );
        let sampler_task = tokio::spawn(sample_managers(
            Arc::clone(&client),
            profile.dispatch.check_interval(),
            cancel.clone(),
        ));

        let mut subscribers = JoinSet::new();
        for sub in &profile.subscriptions {
            subscribers.spawn(run_subscriber(
                Arc::clone(&client),
                transport.clone(),
                sub.clone(),
                cancel.clone(),
            ));
        }

        tokio::time::sleep(Duration::from_millis(profile.duration_ms)).await;
        info!("Run duration elapsed, stopping");
        cancel.cancel();

        let records_produced = producer_task
            .await
            .map_err(|e| CliError::task(format!("producer: {e}")))?;
        let peak_dispatchers = sampler_task
            .await
            .map_err(|e| CliError::task(format!("sampler: {e}")))?;

        let mut reports = Vec::with_capacity(profile.subscriptions.len());
        while let Some(joined) = subscribers.join_next().await {
            reports.push(joined.map_err(|e| CliError::task(format!("subscriber: {e}")))?);
        }
        reports.sort_by(|a, b| a.channel.as_str().cmp(b.channel.as_str()));

        client.close().await;

        let failures: Vec<_> = reports
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Failed(err) => Some(err.clone()),
                _ => None,
            })
            .collect();
        if let Some(first) = failures.first() {
            if failures.len() == reports.len() {
                return Err(CliError::Registration {
                    source: first.clone(),
                });
            }
        }

        let transport_stats = transport.metrics().snapshot();
        let stats = SimulationStats {
            duration: start_time.elapsed(),
            records_produced,
            records_trimmed: transport_stats.records_trimmed,
            consumers_opened: transport_stats.subscriptions,
            peak_dispatchers,
            subscriptions: reports,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            produced = stats.records_produced,
            inconsistent = stats.inconsistent(),
            "Simulation complete"
        );

        Ok(stats)
    }
}

/// Register one subscription and drain it until the run ends
async fn run_subscriber(
    client: Arc<Client>,
    transport: MemoryTransport,
    sub: SubscriptionConfig,
    cancel: CancellationToken,
) -> SubscriptionReport {
    let topic = client.physical_topic(&sub.channel);
    let mut report = SubscriptionReport::new(sub.channel.clone(), topic.clone());

    if sub.start_after_ms > 0 {
        tokio::select! {
            _ = cancel.cancelled() => return report,
            _ = tokio::time::sleep(Duration::from_millis(sub.start_after_ms)) => {}
        }
    }

    let registered = client
        .register(sub.channel.clone(), sub.position.map(Position::new), sub.policy)
        .await;
    record_registration(topic.as_str(), registered.is_ok());

    let mut receiver = match registered {
        Ok(receiver) => receiver,
        Err(err) => {
            warn!(channel = %sub.channel, error = %err, "Subscription not registered");
            report.outcome = Outcome::Failed(err);
            return report;
        }
    };
    report.start = Some(receiver.start());

    if sub.stalled {
        debug!(channel = %sub.channel, "Stalled subscriber holding its queue");
        cancel.cancelled().await;
    } else {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = receiver.recv() => match batch {
                    Some(batch) => {
                        let lag = transport.bounds(&topic).latest.distance(batch.end);
                        record_batch_received(sub.channel.as_str(), &batch, lag);
                        report.delivery.update(&batch, lag);
                    }
                    None => break,
                },
            }
        }
    }

    match receiver.close_reason() {
        Some(reason) => {
            record_subscriber_detached(sub.channel.as_str(), reason.as_str());
            report.outcome = Outcome::Detached(reason);
        }
        None => {
            client.deregister(sub.channel.clone()).await;
            report.outcome = Outcome::Completed;
        }
    }
    report
}

/// Publish manager gauges periodically; returns the peak dispatcher count
async fn sample_managers(client: Arc<Client>, period: Duration, cancel: CancellationToken) -> usize {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut peak = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut total = 0;
                for topic in client.topics() {
                    if let Some(manager) = client.manager(&topic) {
                        let stats = manager.stats();
                        record_manager_stats(&stats);
                        debug!(
                            %topic,
                            targets = stats.targets,
                            dispatchers = stats.dispatchers(),
                            "Manager sampled"
                        );
                        total += stats.dispatchers();
                    }
                }
                peak = peak.max(total);
            }
        }
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ConfigVersion, DispatchConfig, ProducerConfig, SubscriptionPolicy, TopicConfig,
    };
    use dispatcher::DetachReason;

    fn subscription(channel: &str) -> SubscriptionConfig {
        SubscriptionConfig {
            channel: channel.into(),
            policy: SubscriptionPolicy::Earliest,
            position: None,
            start_after_ms: 0,
            stalled: false,
        }
    }

    fn profile(subscriptions: Vec<SubscriptionConfig>) -> SimulationProfile {
        SimulationProfile {
            version: ConfigVersion::V1,
            dispatch: DispatchConfig {
                send_timeout_ms: 100,
                check_interval_ms: 50,
                poll_timeout_ms: 20,
                target_queue_capacity: 2,
                max_batch_size: 16,
                ..Default::default()
            },
            producer: ProducerConfig {
                records_per_second: 500.0,
                payload_bytes: 4,
            },
            topics: vec![TopicConfig {
                name: "p0".into(),
                channels: vec!["p0_v1".into(), "p0_v2".into()],
                prefill: 100,
                retention: None,
            }],
            subscriptions,
            duration_ms: 600,
        }
    }

    #[tokio::test]
    async fn test_simulation_delivers_contiguously() {
        let mut late = subscription("p0_v2");
        late.start_after_ms = 100;

        let simulation = Simulation::new(SimulationConfig {
            profile: profile(vec![subscription("p0_v1"), late]),
            metrics_port: None,
        });
        let stats = simulation.run().await.unwrap();

        assert_eq!(stats.subscriptions.len(), 2);
        assert_eq!(stats.inconsistent(), 0);
        for report in &stats.subscriptions {
            assert_eq!(report.outcome, Outcome::Completed, "{}", report.channel);
            assert!(report.delivery.total_records > 0, "{}", report.channel);
        }
        assert_eq!(stats.subscriptions[0].start, Some(Position::ZERO));
        assert!(stats.records_produced >= 100);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_evicted() {
        let mut stalled = subscription("p0_v2");
        stalled.stalled = true;

        let simulation = Simulation::new(SimulationConfig {
            profile: profile(vec![subscription("p0_v1"), stalled]),
            metrics_port: None,
        });
        let stats = simulation.run().await.unwrap();

        let stalled = &stats.subscriptions[1];
        assert_eq!(
            stalled.outcome,
            Outcome::Detached(DetachReason::SlowConsumerEvicted)
        );
        assert_eq!(stats.subscriptions[0].outcome, Outcome::Completed);
        assert!(stats.subscriptions[0].is_consistent());
    }

    #[tokio::test]
    async fn test_all_registrations_failing_is_an_error() {
        let mut bad = subscription("p0_v1");
        bad.policy = SubscriptionPolicy::Unknown;

        let mut profile = profile(vec![bad]);
        profile.duration_ms = 50;
        let result = Simulation::new(SimulationConfig {
            profile,
            metrics_port: None,
        })
        .run()
        .await;

        assert!(matches!(result, Err(CliError::Registration { .. })));
    }
}
