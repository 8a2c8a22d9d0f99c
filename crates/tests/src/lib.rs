//! # Integration Tests
//!
//! Cross-crate end-to-end scenarios.
//!
//! Covers:
//! - Contract smoke checks
//! - Shared consumption, split and merge over the in-memory transport
//! - Slow consumer isolation, duplicate names, manager lifecycle

#[cfg(test)]
mod contract_tests {
    use contracts::{SuffixNaming, TopicNaming};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(SuffixNaming.physical_topic(&"p0_v1".into()), "p0");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{DispatchConfig, PhysicalTopic, Position, SubscriptionPolicy};
    use dispatcher::{DetachReason, DispatchClient, DispatchError, TargetReceiver};
    use observability::DeliveryAggregator;
    use transport::{MemoryTransport, MemoryTransportConfig};

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            tolerance: 10,
            target_queue_capacity: 64,
            send_timeout_ms: 1_000,
            poll_timeout_ms: 10,
            check_interval_ms: 20,
            shutdown_grace_ms: 1_000,
            max_batch_size: 5,
        }
    }

    fn setup(config: DispatchConfig) -> (MemoryTransport, DispatchClient<MemoryTransport>) {
        let transport = MemoryTransport::new(MemoryTransportConfig::new(config.max_batch_size));
        let client = DispatchClient::builder(transport.clone()).config(config).build();
        (transport, client)
    }

    fn p0() -> PhysicalTopic {
        PhysicalTopic::new("p0")
    }

    /// Append `count` records, cycling through `tags`
    fn produce(transport: &MemoryTransport, tags: &[&str], count: usize) {
        for i in 0..count {
            transport.append("p0", tags[i % tags.len()], "payload");
        }
    }

    /// Receive until the stream covers `through`, checking the chain
    async fn drain_through(rx: &mut TargetReceiver, through: Position) -> DeliveryAggregator {
        let mut agg = DeliveryAggregator::new();
        while agg.last_end.is_none_or(|end| end < through) {
            let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for a batch")
                .expect("stream ended early");
            for record in &batch.records {
                assert_eq!(&record.tag, rx.name(), "foreign record delivered");
                assert!(record.position > batch.begin && record.position <= batch.end);
            }
            agg.update(&batch, 0);
        }
        agg
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    /// Three channels on one topic share a single transport consumer
    #[tokio::test]
    async fn test_e2e_shared_consumer_fanout() {
        let (transport, client) = setup(fast_config());

        let mut v1 = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        let mut v2 = client.register("p0_v2", None, SubscriptionPolicy::Earliest).await.unwrap();
        let mut v3 = client.register("p0_v3", None, SubscriptionPolicy::Earliest).await.unwrap();

        assert_eq!(client.num_managers(), 1);
        assert_eq!(client.dispatcher_count(&p0()), 1);

        produce(&transport, &["p0_v1", "p0_v2", "p0_v3"], 300);
        let through = Position::new(300);

        for rx in [&mut v1, &mut v2, &mut v3] {
            let agg = drain_through(rx, through).await;
            assert!(agg.is_contiguous(), "{}", rx.name());
            assert_eq!(agg.first_begin, Some(Position::ZERO));
            assert_eq!(agg.total_records, 100, "{}", rx.name());
        }

        assert_eq!(transport.metrics().snapshot().subscriptions, 1);
        client.close().await;
        assert_eq!(transport.open_consumers(), 0);
    }

    /// A far-behind subscriber gets a solo dispatcher and merges back
    #[tokio::test]
    async fn test_e2e_split_then_merge() {
        let (transport, client) = setup(fast_config());
        produce(&transport, &["p0_v1", "p0_v2"], 200);
        let through = Position::new(200);

        let mut v1 = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        drain_through(&mut v1, through).await;
        wait_until(|| client.manager(&p0()).and_then(|m| m.main_cursor()) == Some(through)).await;

        let mut v2 = client
            .register("p0_v2", Some(Position::new(20)), SubscriptionPolicy::Unknown)
            .await
            .unwrap();
        assert_eq!(v2.start(), Position::new(20));
        // The solo opened its own consumer
        assert_eq!(transport.metrics().snapshot().subscriptions, 2);

        let agg = drain_through(&mut v2, through).await;
        assert_eq!(agg.first_begin, Some(Position::new(20)));
        assert!(agg.is_contiguous());
        assert_eq!(agg.total_records, 90);

        wait_until(|| client.dispatcher_count(&p0()) == 1).await;

        // Both keep receiving from the surviving dispatcher without gaps
        produce(&transport, &["p0_v1", "p0_v2"], 20);
        let tail = Position::new(220);
        let a = drain_through(&mut v1, tail).await;
        let b = drain_through(&mut v2, tail).await;
        assert!(a.is_contiguous() && b.is_contiguous());
        assert_eq!(a.first_begin, Some(through));
        assert_eq!(b.first_begin, Some(through));
        assert_eq!(a.total_records + b.total_records, 20);

        client.close().await;
    }

    /// A stuck subscriber is evicted while its neighbours keep flowing
    #[tokio::test]
    async fn test_e2e_slow_consumer_isolated() {
        let config = DispatchConfig {
            target_queue_capacity: 2,
            send_timeout_ms: 50,
            ..fast_config()
        };
        let (transport, client) = setup(config);

        let mut fast = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        let mut stuck = client.register("p0_v2", None, SubscriptionPolicy::Earliest).await.unwrap();

        produce(&transport, &["p0_v1", "p0_v2"], 100);
        let agg = drain_through(&mut fast, Position::new(100)).await;
        assert!(agg.is_contiguous());
        assert_eq!(agg.total_records, 50);

        wait_until(|| client.num_targets(&p0()) == 1).await;

        while stuck.try_recv().is_some() {}
        let ended = tokio::time::timeout(Duration::from_secs(1), stuck.recv()).await.unwrap();
        assert!(ended.is_none());
        assert_eq!(stuck.close_reason(), Some(DetachReason::SlowConsumerEvicted));
        assert!(matches!(
            stuck.next_batch().await,
            Err(DispatchError::SlowConsumerEvicted { .. })
        ));

        client.close().await;
    }

    #[tokio::test]
    async fn test_e2e_duplicate_registration_keeps_original() {
        let (transport, client) = setup(fast_config());

        let mut original = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        let err = client
            .register("p0_v1", None, SubscriptionPolicy::Earliest)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateRegistration { .. }));

        produce(&transport, &["p0_v1"], 10);
        let agg = drain_through(&mut original, Position::new(10)).await;
        assert_eq!(agg.total_records, 10);

        client.close().await;
    }

    /// Deregistering the last subscriber retires the manager and its consumer
    #[tokio::test]
    async fn test_e2e_last_deregister_then_fresh_manager() {
        let (transport, client) = setup(fast_config());
        produce(&transport, &["p0_v1"], 10);

        let mut rx = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        drain_through(&mut rx, Position::new(10)).await;

        client.deregister("p0_v1").await;
        assert_eq!(client.num_managers(), 0);
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
        assert_eq!(rx.close_reason(), Some(DetachReason::Deregistered));
        wait_until(|| transport.open_consumers() == 0).await;

        let mut again = client.register("p0_v1", None, SubscriptionPolicy::Latest).await.unwrap();
        assert_eq!(again.start(), Position::new(10));
        assert_eq!(client.num_managers(), 1);

        produce(&transport, &["p0_v1"], 3);
        let agg = drain_through(&mut again, Position::new(13)).await;
        assert_eq!(agg.first_begin, Some(Position::new(10)));
        assert_eq!(agg.total_records, 3);

        client.close().await;
    }

    /// v1 and v2 share p0; the manager lives until the last one leaves
    #[tokio::test]
    async fn test_e2e_p0_lifecycle() {
        let (transport, client) = setup(fast_config());

        let mut v1 = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        let mut v2 = client.register("p0_v2", None, SubscriptionPolicy::Earliest).await.unwrap();
        assert_eq!(client.num_targets(&p0()), 2);
        let first = client.manager(&p0()).unwrap();

        client.deregister("p0_v1").await;
        assert_eq!(client.num_targets(&p0()), 1);
        assert_eq!(client.dispatcher_count(&p0()), 1);
        assert_eq!(v1.recv().await, None);

        produce(&transport, &["p0_v1", "p0_v2"], 10);
        let agg = drain_through(&mut v2, Position::new(10)).await;
        assert_eq!(agg.total_records, 5);

        client.deregister("p0_v2").await;
        assert_eq!(client.num_managers(), 0);
        assert!(first.is_retired());
        wait_until(|| transport.open_consumers() == 0).await;

        let mut v3 = client.register("p0_v3", None, SubscriptionPolicy::Earliest).await.unwrap();
        let second = client.manager(&p0()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(client.num_targets(&p0()), 1);

        produce(&transport, &["p0_v3"], 3);
        let agg = drain_through(&mut v3, Position::new(13)).await;
        assert!(agg.is_contiguous());
        assert_eq!(agg.first_begin, Some(Position::ZERO));
        assert_eq!(agg.total_records, 3);

        client.close().await;
    }

    /// Retention overtaking a live consumer surfaces as an invalid position
    #[tokio::test]
    async fn test_e2e_midstream_trim_reports_position_invalid() {
        let config = DispatchConfig {
            target_queue_capacity: 1,
            max_batch_size: 10,
            ..fast_config()
        };
        let (transport, client) = setup(config);
        produce(&transport, &["p0_v1"], 200);

        let mut rx = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        transport.trim_before(&p0(), Position::new(150));

        let err = loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.next_batch()).await.unwrap() {
                Ok(batch) => assert!(batch.end <= Position::new(150)),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, DispatchError::PositionInvalid { .. }));
        assert_eq!(rx.close_reason(), Some(DetachReason::PositionInvalid));
        wait_until(|| client.num_managers() == 0).await;

        let rx = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        assert_eq!(rx.start(), Position::new(150));

        client.close().await;
    }

    /// Fetch failure closes every queue; the topic recovers on re-register
    #[tokio::test]
    async fn test_e2e_transport_failure_and_recovery() {
        let (transport, client) = setup(fast_config());

        let mut rx = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        transport.set_fetch_failure(&p0(), true);

        let ended = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(ended.is_none());
        assert_eq!(rx.close_reason(), Some(DetachReason::TransportUnavailable));
        wait_until(|| client.num_managers() == 0).await;

        transport.set_fetch_failure(&p0(), false);
        produce(&transport, &["p0_v1"], 4);
        let mut rx = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        let agg = drain_through(&mut rx, Position::new(4)).await;
        assert_eq!(agg.total_records, 4);

        client.close().await;
    }

    #[tokio::test]
    async fn test_e2e_trimmed_position_rejected() {
        let (transport, client) = setup(fast_config());
        produce(&transport, &["p0_v1"], 50);
        transport.trim_before(&p0(), Position::new(30));

        let err = client
            .register("p0_v1", Some(Position::new(10)), SubscriptionPolicy::Unknown)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PositionInvalid { .. }));
        assert_eq!(client.num_managers(), 0);

        let rx = client.register("p0_v1", None, SubscriptionPolicy::Earliest).await.unwrap();
        assert_eq!(rx.start(), Position::new(30));

        client.close().await;
    }

    /// A loaded profile's dispatch section drives the client
    #[tokio::test]
    async fn test_e2e_profile_driven_client() {
        let profile = ConfigLoader::load_from_str(
            r#"
[dispatch]
tolerance = 4
max_batch_size = 3
poll_timeout_ms = 10
check_interval_ms = 20

[[topics]]
name = "dml_0"
channels = ["dml_0_441v0", "dml_0_442v0"]

[[subscriptions]]
channel = "dml_0_441v0"

[[subscriptions]]
channel = "dml_0_442v0"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let transport = MemoryTransport::new(MemoryTransportConfig::new(
            profile.dispatch.max_batch_size,
        ));
        let client = DispatchClient::builder(transport.clone())
            .config(profile.dispatch.clone())
            .build();

        let mut receivers = Vec::new();
        for sub in &profile.subscriptions {
            let rx = client
                .register(sub.channel.clone(), sub.position.map(Position::new), sub.policy)
                .await
                .unwrap();
            receivers.push(rx);
        }
        assert_eq!(client.topics(), vec![PhysicalTopic::new("dml_0")]);

        for i in 0..12 {
            let channel = &profile.topics[0].channels[i % 2];
            transport.append("dml_0", channel.clone(), "x");
        }
        for rx in &mut receivers {
            let agg = drain_through(rx, Position::new(12)).await;
            assert_eq!(agg.total_records, 6);
            assert!(agg.batch_size.max() <= 3.0);
        }

        client.close().await;
    }
}
