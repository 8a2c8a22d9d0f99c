//! DispatcherManager - every dispatcher and target of one physical topic
//!
//! ## Placement
//! - no main dispatcher: the new target gets one, subscribed at its position
//! - position within `[main cursor, main cursor + tolerance]`: attach to main
//! - anything else: a solo dispatcher subscribed at the position
//!
//! ## Control loop
//! Every `check_interval` the manager sweeps detached targets, tears down
//! empty or dead dispatchers, promotes a solo when main is gone, merges
//! caught-up solo targets into main and reports emptiness to the client.
//!
//! Lock order: manager, then solo dispatcher, then main dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ::metrics::counter;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{
    ChannelName, DispatchConfig, PhysicalTopic, Position, SubscriptionPolicy, Transport,
};

use crate::dispatcher::{Dispatcher, DispatcherKind, DispatcherStats};
use crate::error::{DispatchError, Result};
use crate::handle::DispatcherHandle;
use crate::lock;
use crate::metrics::MetricsSnapshot;
use crate::target::{DetachReason, Target, TargetReceiver};

/// Point-in-time view of a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub topic: PhysicalTopic,
    /// Live targets
    pub targets: usize,
    /// Registrations still in progress
    pub pending: usize,
    pub main: Option<DispatcherStats>,
    pub solos: Vec<DispatcherStats>,
    /// Live subscriptions, sorted by name
    pub subscriptions: Vec<TargetStats>,
    /// Counters summed over every current dispatcher
    pub totals: MetricsSnapshot,
}

/// Point-in-time view of one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStats {
    pub name: ChannelName,
    pub start: Position,
    pub covered: Position,
    /// Id of the serving dispatcher
    pub dispatcher: u64,
    pub batches: u64,
    pub records: u64,
}

impl ManagerStats {
    pub fn dispatchers(&self) -> usize {
        usize::from(self.main.is_some()) + self.solos.len()
    }
}

#[derive(Default)]
struct ManagerState {
    targets: HashMap<ChannelName, Arc<Target>>,
    /// Names with an `add` in progress
    pending: HashSet<ChannelName>,
    main: Option<Arc<DispatcherHandle>>,
    solos: HashMap<u64, Arc<DispatcherHandle>>,
    /// Set once the manager accepts no more registrations
    retired: bool,
}

impl ManagerState {
    fn live_targets(&self) -> usize {
        self.targets.values().filter(|t| !t.is_detached()).count()
    }

    fn live_main(&self) -> Option<&Arc<DispatcherHandle>> {
        self.main.as_ref().filter(|main| !main.is_stopped())
    }

    fn is_live(&self, name: &ChannelName) -> bool {
        self.pending.contains(name) || self.targets.get(name).is_some_and(|t| !t.is_detached())
    }
}

/// Owner of all dispatchers and targets for one physical topic
pub struct DispatcherManager<T: Transport> {
    topic: PhysicalTopic,
    transport: Arc<T>,
    config: DispatchConfig,
    state: Mutex<ManagerState>,
    next_id: AtomicU64,
    /// Parent of every dispatcher token; stops the control loop
    cancel: CancellationToken,
    closing: AtomicBool,
    /// Cancelled once `close` has finished
    closed: CancellationToken,
    idle_tx: Option<mpsc::UnboundedSender<PhysicalTopic>>,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> DispatcherManager<T> {
    pub fn new(topic: PhysicalTopic, transport: Arc<T>, config: DispatchConfig) -> Self {
        Self {
            topic,
            transport,
            config,
            state: Mutex::new(ManagerState::default()),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
            idle_tx: None,
            control: Mutex::new(None),
        }
    }

    /// Tie the manager's lifetime to `parent`
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Report the topic on `tx` whenever the manager has no targets left
    pub fn with_idle_notifier(mut self, tx: mpsc::UnboundedSender<PhysicalTopic>) -> Self {
        self.idle_tx = Some(tx);
        self
    }

    /// Start the control loop
    pub fn start(self) -> Arc<Self> {
        let manager = Arc::new(self);
        let worker = tokio::spawn(Arc::clone(&manager).run());
        *lock(&manager.control) = Some(worker);
        manager
    }

    pub fn topic(&self) -> &PhysicalTopic {
        &self.topic
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Live targets across main and solos
    pub fn num(&self) -> usize {
        lock(&self.state).live_targets()
    }

    pub fn dispatcher_count(&self) -> usize {
        let state = lock(&self.state);
        usize::from(state.main.is_some()) + state.solos.len()
    }

    /// Cursor of the main dispatcher, if there is one
    pub fn main_cursor(&self) -> Option<Position> {
        lock(&self.state).main.as_ref().map(|main| main.cursor())
    }

    pub fn is_retired(&self) -> bool {
        lock(&self.state).retired
    }

    pub fn stats(&self) -> ManagerStats {
        let state = lock(&self.state);
        let main = state.main.as_ref().map(|main| main.stats());
        let mut solos: Vec<DispatcherStats> = state.solos.values().map(|solo| solo.stats()).collect();
        solos.sort_by_key(|solo| solo.id);
        let totals = main
            .iter()
            .chain(solos.iter())
            .fold(MetricsSnapshot::default(), |acc, stats| acc.merged(stats.metrics));

        let mut subscriptions: Vec<TargetStats> = state
            .targets
            .values()
            .filter(|target| !target.is_detached())
            .map(|target| {
                let (batches, records) = target.delivered();
                TargetStats {
                    name: target.name().clone(),
                    start: target.start(),
                    covered: target.covered(),
                    dispatcher: target.owner(),
                    batches,
                    records,
                }
            })
            .collect();
        subscriptions.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));

        ManagerStats {
            topic: self.topic.clone(),
            targets: subscriptions.len(),
            pending: state.pending.len(),
            main,
            solos,
            subscriptions,
            totals,
        }
    }

    /// Register `name` and attach it to a dispatcher
    ///
    /// # Errors
    /// - `DuplicateRegistration` if `name` is live or being registered
    /// - `PositionInvalid` if no position can be resolved or it is not retained
    /// - `TransportUnavailable` if bounds lookup or subscribe fails
    /// - `ManagerClosed` if the manager retired meanwhile
    #[instrument(
        name = "manager_add",
        skip(self),
        fields(topic = %self.topic, channel = %name)
    )]
    pub async fn add(
        &self,
        name: &ChannelName,
        position: Option<Position>,
        policy: SubscriptionPolicy,
    ) -> Result<TargetReceiver> {
        let _reservation = self.reserve(name)?;
        let start = self.resolve_position(name, position, policy).await?;
        let (target, receiver) = Target::new(
            name.clone(),
            self.topic.clone(),
            start,
            self.config.target_queue_capacity,
        );

        {
            let mut state = lock(&self.state);
            if state.retired {
                return Err(DispatchError::ManagerClosed {
                    topic: self.topic.clone(),
                });
            }
            if let Some(main) = state.live_main().cloned() {
                if main.shared().attach_within(&target, start, self.config.tolerance) {
                    state.targets.insert(name.clone(), Arc::clone(&target));
                    info!(%start, dispatcher = main.id(), "Target attached to main dispatcher");
                    return Ok(receiver);
                }
            }
        }

        let consumer = self
            .transport
            .subscribe(&self.topic, start)
            .await
            .map_err(|err| DispatchError::from_transport(name, err))?;
        let dispatcher = Dispatcher::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            DispatcherKind::Solo,
            consumer,
            start,
            &self.config,
            self.cancel.child_token(),
        );
        dispatcher.attach(Arc::clone(&target));

        let installed = {
            let mut state = lock(&self.state);
            if state.retired {
                Err(dispatcher)
            } else {
                let id = dispatcher.id();
                let becomes_main = state.live_main().is_none();
                if becomes_main {
                    dispatcher.promote();
                }
                let handle = Arc::new(dispatcher.spawn());
                let stale = if becomes_main {
                    state.main.replace(handle)
                } else {
                    state.solos.insert(id, handle);
                    None
                };
                state.targets.insert(name.clone(), Arc::clone(&target));
                Ok((id, becomes_main, stale))
            }
        };

        match installed {
            Ok((id, becomes_main, stale)) => {
                if let Some(stale) = stale {
                    stale.shutdown(self.config.shutdown_grace()).await;
                }
                let kind = if becomes_main {
                    DispatcherKind::Main
                } else {
                    DispatcherKind::Solo
                };
                info!(%start, dispatcher = id, %kind, "Target attached to new dispatcher");
                Ok(receiver)
            }
            Err(dispatcher) => {
                target.detach(DetachReason::ManagerClosed);
                dispatcher.discard().await;
                Err(DispatchError::ManagerClosed {
                    topic: self.topic.clone(),
                })
            }
        }
    }

    fn reserve(&self, name: &ChannelName) -> Result<Reservation<'_, T>> {
        let mut state = lock(&self.state);
        if state.retired {
            return Err(DispatchError::ManagerClosed {
                topic: self.topic.clone(),
            });
        }
        if state.is_live(name) {
            return Err(DispatchError::duplicate(name, &self.topic));
        }
        state.pending.insert(name.clone());
        Ok(Reservation {
            manager: self,
            name: name.clone(),
        })
    }

    async fn resolve_position(
        &self,
        name: &ChannelName,
        position: Option<Position>,
        policy: SubscriptionPolicy,
    ) -> Result<Position> {
        if position.is_none() && policy == SubscriptionPolicy::Unknown {
            return Err(DispatchError::position_invalid(
                name,
                "no start position given and subscription policy is unknown",
            ));
        }

        let bounds = self
            .transport
            .position_bounds(&self.topic)
            .await
            .map_err(|err| DispatchError::from_transport(name, err))?;

        match position {
            Some(position) if bounds.contains(position) => Ok(position),
            Some(position) => Err(DispatchError::position_invalid(
                name,
                format!(
                    "{position} outside retained range [{}, {}]",
                    bounds.earliest, bounds.latest
                ),
            )),
            None if policy == SubscriptionPolicy::Latest => Ok(bounds.latest),
            None => Ok(bounds.earliest),
        }
    }

    /// Deregister `name`
    ///
    /// Returns `false` when the name is unknown. A solo left without targets
    /// is torn down; main stays for as long as the manager lives.
    #[instrument(
        name = "manager_remove",
        skip(self),
        fields(topic = %self.topic, channel = %name)
    )]
    pub async fn remove(&self, name: &ChannelName) -> bool {
        let teardown = {
            let mut state = lock(&self.state);
            let Some(target) = state.targets.remove(name) else {
                return false;
            };
            let was_live = target.detach(DetachReason::Deregistered);

            let owner = target.owner();
            let solo_emptied = match state.solos.get(&owner) {
                Some(solo) => {
                    solo.shared().remove_target(&target);
                    solo.num_targets() == 0
                }
                None => {
                    if let Some(main) = &state.main {
                        main.shared().remove_target(&target);
                    }
                    false
                }
            };
            info!(was_live, covered = %target.covered(), "Target removed");

            if solo_emptied {
                state.solos.remove(&owner)
            } else {
                None
            }
        };

        if let Some(solo) = teardown {
            debug!(dispatcher = solo.id(), "Tearing down empty solo dispatcher");
            solo.shutdown(self.config.shutdown_grace()).await;
        }
        true
    }

    /// Retire the manager if it has no live or pending targets
    ///
    /// A retired manager rejects every further `add` with `ManagerClosed`;
    /// the caller that retired it is expected to `close` it.
    pub fn try_retire(&self) -> bool {
        let mut state = lock(&self.state);
        if state.retired || state.live_targets() > 0 || !state.pending.is_empty() {
            return false;
        }
        state.retired = true;
        true
    }

    /// Wait until `close` has finished
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Stop every dispatcher and close every remaining target queue
    ///
    /// Each dispatcher gets `shutdown_grace` before its task is aborted.
    /// Concurrent callers all wait for the first one to finish.
    #[instrument(name = "manager_close", skip(self), fields(topic = %self.topic))]
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            self.closed.cancelled().await;
            return;
        }

        let (dispatchers, targets) = {
            let mut state = lock(&self.state);
            state.retired = true;
            let mut dispatchers: Vec<Arc<DispatcherHandle>> = state.main.take().into_iter().collect();
            dispatchers.extend(state.solos.drain().map(|(_, solo)| solo));
            let targets: Vec<Arc<Target>> = state.targets.drain().map(|(_, t)| t).collect();
            (dispatchers, targets)
        };

        let detached = targets
            .iter()
            .filter(|target| target.detach(DetachReason::ManagerClosed))
            .count();

        let grace = self.config.shutdown_grace();
        let count = dispatchers.len();
        let mut shutdowns = JoinSet::new();
        for dispatcher in dispatchers {
            shutdowns.spawn(async move { dispatcher.shutdown(grace).await });
        }
        while let Some(joined) = shutdowns.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Dispatcher shutdown task failed");
            }
        }

        self.cancel.cancel();
        let control = lock(&self.control).take();
        if let Some(mut control) = control {
            if tokio::time::timeout(grace, &mut control).await.is_err() {
                warn!(?grace, "Control loop did not stop within grace period, aborting");
                control.abort();
            }
        }

        self.closed.cancel();
        info!(dispatchers = count, targets = detached, "Manager closed");
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(topic = %self.topic, "Manager control loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.check().await,
            }
        }

        debug!(topic = %self.topic, "Manager control loop stopped");
    }

    /// One pass of the control loop
    async fn check(&self) {
        let tolerance = self.config.tolerance;
        let (teardown, idle) = {
            let mut state = lock(&self.state);
            if state.retired {
                return;
            }

            state.targets.retain(|_, target| !target.is_detached());

            let mut teardown = Vec::new();
            if state.main.as_ref().is_some_and(|main| main.is_stopped()) {
                teardown.extend(state.main.take());
            }
            let dead: Vec<u64> = state
                .solos
                .iter()
                .filter(|(_, solo)| solo.is_stopped() || solo.num_targets() == 0)
                .map(|(id, _)| *id)
                .collect();
            for id in dead {
                teardown.extend(state.solos.remove(&id));
            }

            if state.main.is_none() {
                let furthest = state
                    .solos
                    .iter()
                    .max_by_key(|(_, solo)| solo.shared().effective_cursor())
                    .map(|(id, _)| *id);
                if let Some(solo) = furthest.and_then(|id| state.solos.remove(&id)) {
                    solo.shared().promote();
                    info!(
                        topic = %self.topic,
                        dispatcher = solo.id(),
                        cursor = %solo.cursor(),
                        "Solo dispatcher promoted to main"
                    );
                    state.main = Some(solo);
                }
            }

            if let Some(main) = state.main.clone() {
                let mut emptied = Vec::new();
                for (id, solo) in &state.solos {
                    let merged = solo.shared().merge_into(main.shared(), tolerance);
                    if !merged.is_empty() {
                        counter!("msgfan_merges_total").increment(merged.len() as u64);
                        info!(
                            topic = %self.topic,
                            from = *id,
                            into = main.id(),
                            targets = ?merged,
                            "Targets merged into main dispatcher"
                        );
                    }
                    if solo.num_targets() == 0 {
                        emptied.push(*id);
                    }
                }
                for id in emptied {
                    teardown.extend(state.solos.remove(&id));
                }
            }

            let idle = state.live_targets() == 0 && state.pending.is_empty();
            (teardown, idle)
        };

        for dispatcher in teardown {
            debug!(
                topic = %self.topic,
                dispatcher = dispatcher.id(),
                kind = %dispatcher.kind(),
                "Tearing down dispatcher"
            );
            dispatcher.shutdown(self.config.shutdown_grace()).await;
        }

        if idle {
            if let Some(tx) = &self.idle_tx {
                let _ = tx.send(self.topic.clone());
            }
        }
    }
}

/// Pending registration; released on drop, including when `add` is cancelled
struct Reservation<'a, T: Transport> {
    manager: &'a DispatcherManager<T>,
    name: ChannelName,
}

impl<T: Transport> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        lock(&self.manager.state).pending.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::RecordBatch;
    use std::time::Duration;
    use transport::{MemoryTransport, MemoryTransportConfig};

    fn config() -> DispatchConfig {
        DispatchConfig {
            tolerance: 5,
            send_timeout_ms: 5_000,
            poll_timeout_ms: 10,
            check_interval_ms: 20,
            shutdown_grace_ms: 1_000,
            ..Default::default()
        }
    }

    fn manager(transport: &MemoryTransport, config: DispatchConfig) -> Arc<DispatcherManager<MemoryTransport>> {
        DispatcherManager::new("p0".into(), Arc::new(transport.clone()), config).start()
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

    async fn recv(rx: &mut TargetReceiver) -> RecordBatch {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .expect("receiver closed")
    }

    /// Read until the receiver has covered `until`, checking contiguity and
    /// returning the record positions seen
    async fn drain_until(rx: &mut TargetReceiver, covered: &mut Position, until: Position) -> Vec<u64> {
        let mut seen = Vec::new();
        while *covered < until {
            let batch = recv(rx).await;
            assert_eq!(batch.begin, *covered, "gap or overlap in {}", rx.name());
            for record in &batch.records {
                assert_eq!(&record.tag, rx.name());
                assert!(record.position > batch.begin && record.position <= batch.end);
            }
            *covered = batch.end;
            seen.extend(batch.records.iter().map(|r| r.position.offset()));
        }
        seen
    }

    #[tokio::test]
    async fn test_num_tracks_add_and_remove() {
        let transport = MemoryTransport::default();
        let manager = manager(&transport, config());
        let v1: ChannelName = "p0_v1".into();
        let v2: ChannelName = "p0_v2".into();

        let _rx1 = manager.add(&v1, None, SubscriptionPolicy::Earliest).await.unwrap();
        let _rx2 = manager.add(&v2, None, SubscriptionPolicy::Earliest).await.unwrap();
        assert_eq!(manager.num(), 2);
        assert_eq!(manager.dispatcher_count(), 1);

        assert!(manager.remove(&v1).await);
        assert!(!manager.remove(&v1).await);
        assert_eq!(manager.num(), 1);

        manager.close().await;
        assert_eq!(manager.num(), 0);
        assert_eq!(transport.open_consumers(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_original() {
        let transport = MemoryTransport::default();
        let manager = manager(&transport, config());
        let v1: ChannelName = "p0_v1".into();

        let mut rx = manager.add(&v1, None, SubscriptionPolicy::Earliest).await.unwrap();
        let err = manager.add(&v1, None, SubscriptionPolicy::Earliest).await.unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateRegistration { .. }));
        assert_eq!(manager.num(), 1);

        transport.append("p0", "p0_v1", "still here");
        let batch = recv(&mut rx).await;
        assert_eq!(batch.records.len(), 1);
        assert!(rx.close_reason().is_none());

        manager.close().await;
    }

    #[tokio::test]
    async fn test_position_resolution_errors() {
        let transport = MemoryTransport::default();
        transport.append("p0", "p0_v1", "a");
        let manager = manager(&transport, config());
        let v1: ChannelName = "p0_v1".into();

        let err = manager.add(&v1, None, SubscriptionPolicy::Unknown).await.unwrap_err();
        assert!(matches!(err, DispatchError::PositionInvalid { .. }));

        let err = manager
            .add(&v1, Some(Position::new(10)), SubscriptionPolicy::Unknown)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PositionInvalid { .. }));

        transport.set_subscribe_failure(true);
        let err = manager.add(&v1, None, SubscriptionPolicy::Earliest).await.unwrap_err();
        assert!(matches!(err, DispatchError::TransportUnavailable { .. }));

        let stats = manager.stats();
        assert_eq!((stats.targets, stats.pending), (0, 0));
        assert!(manager.try_retire());
        manager.close().await;
    }

    #[tokio::test]
    async fn test_latest_policy_skips_history() {
        let transport = MemoryTransport::default();
        transport.append("p0", "p0_v1", "old");
        let manager = manager(&transport, config());

        let mut rx = manager
            .add(&"p0_v1".into(), None, SubscriptionPolicy::Latest)
            .await
            .unwrap();
        assert_eq!(rx.start(), Position::new(1));

        transport.append("p0", "p0_v1", "new");
        let batch = recv(&mut rx).await;
        assert_eq!(batch.begin, Position::new(1));
        assert_eq!(batch.records[0].position, Position::new(2));

        manager.close().await;
    }

    #[tokio::test]
    async fn test_far_ahead_target_splits_then_merges() {
        let transport = MemoryTransport::new(MemoryTransportConfig::new(10));
        for i in 0..1000u64 {
            let tag = if i % 2 == 0 { "p0_v1" } else { "p0_v3" };
            transport.append("p0", tag, "x");
        }
        let manager = manager(&transport, config());

        // v1 is not drained yet, so main stalls far behind the log end
        let mut rx1 = manager
            .add(&"p0_v1".into(), None, SubscriptionPolicy::Earliest)
            .await
            .unwrap();
        let mut rx3 = manager
            .add(&"p0_v3".into(), None, SubscriptionPolicy::Latest)
            .await
            .unwrap();
        assert_eq!(rx3.start(), Position::new(1000));
        assert_eq!(manager.dispatcher_count(), 2);
        assert_eq!(manager.num(), 2);

        let mut covered1 = Position::ZERO;
        let seen = drain_until(&mut rx1, &mut covered1, Position::new(1000)).await;
        assert_eq!(seen.len(), 500);
        assert!(seen.iter().all(|p| p % 2 == 1));

        wait_until(|| manager.dispatcher_count() == 1).await;
        assert_eq!(manager.num(), 2);

        for _ in 0..10 {
            transport.append("p0", "p0_v1", "y");
            transport.append("p0", "p0_v3", "z");
        }
        let mut covered3 = Position::new(1000);
        let seen3 = drain_until(&mut rx3, &mut covered3, Position::new(1020)).await;
        assert_eq!(seen3, (1..=10).map(|i| 1000 + 2 * i).collect::<Vec<_>>());
        drain_until(&mut rx1, &mut covered1, Position::new(1020)).await;

        manager.close().await;
    }

    #[tokio::test]
    async fn test_behind_target_catches_up_without_gaps() {
        let transport = MemoryTransport::new(MemoryTransportConfig::new(4));
        let manager = manager(&transport, config());

        let mut rx1 = manager
            .add(&"p0_v1".into(), None, SubscriptionPolicy::Earliest)
            .await
            .unwrap();
        for _ in 0..40 {
            transport.append("p0", "p0_v1", "a");
            transport.append("p0", "p0_v2", "b");
        }
        let mut covered1 = Position::ZERO;
        drain_until(&mut rx1, &mut covered1, Position::new(80)).await;
        wait_until(|| manager.main_cursor() == Some(Position::new(80))).await;

        let mut rx2 = manager
            .add(&"p0_v2".into(), Some(Position::new(10)), SubscriptionPolicy::Unknown)
            .await
            .unwrap();
        assert_eq!(manager.dispatcher_count(), 2);

        let mut covered2 = Position::new(10);
        let seen = drain_until(&mut rx2, &mut covered2, Position::new(80)).await;
        assert_eq!(seen, (6..=40).map(|i| 2 * i).collect::<Vec<_>>());
        wait_until(|| manager.dispatcher_count() == 1).await;

        transport.append("p0", "p0_v2", "c");
        let seen = drain_until(&mut rx2, &mut covered2, Position::new(81)).await;
        assert_eq!(seen, vec![81]);

        manager.close().await;
        assert_eq!(rx2.recv().await, None);
        assert_eq!(rx2.close_reason(), Some(DetachReason::ManagerClosed));
    }

    #[tokio::test]
    async fn test_solo_promoted_when_main_dies() {
        let transport = MemoryTransport::new(MemoryTransportConfig::new(10));
        for _ in 0..200 {
            transport.append("p0", "p0_v1", "x");
        }
        let manager = manager(
            &transport,
            DispatchConfig {
                send_timeout_ms: 100,
                ..config()
            },
        );

        // v1 never drains: main stalls, evicts it and then falls below the trim point
        let _rx1 = manager
            .add(&"p0_v1".into(), None, SubscriptionPolicy::Earliest)
            .await
            .unwrap();
        let mut rx2 = manager
            .add(&"p0_v2".into(), None, SubscriptionPolicy::Latest)
            .await
            .unwrap();
        assert_eq!(manager.dispatcher_count(), 2);
        let solo_id = manager.stats().solos[0].id;

        transport.trim_before(&"p0".into(), Position::new(200));
        wait_until(|| {
            manager
                .stats()
                .main
                .is_some_and(|main| main.id == solo_id && main.kind == DispatcherKind::Main)
        })
        .await;
        assert_eq!(manager.num(), 1);

        transport.append("p0", "p0_v2", "after");
        let mut covered = Position::new(200);
        assert_eq!(drain_until(&mut rx2, &mut covered, Position::new(201)).await, vec![201]);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_idle_notice_and_retire() {
        let transport = MemoryTransport::default();
        let (tx, mut idle_rx) = mpsc::unbounded_channel();
        let manager = DispatcherManager::new("p0".into(), Arc::new(transport.clone()), config())
            .with_idle_notifier(tx)
            .start();

        let rx = manager
            .add(&"p0_v1".into(), None, SubscriptionPolicy::Earliest)
            .await
            .unwrap();
        drop(rx);
        transport.append("p0", "p0_v1", "nobody listens");

        let topic = tokio::time::timeout(Duration::from_secs(5), idle_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic, "p0");
        assert_eq!(manager.num(), 0);

        assert!(manager.try_retire());
        assert!(!manager.try_retire());
        let err = manager
            .add(&"p0_v2".into(), None, SubscriptionPolicy::Earliest)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ManagerClosed { .. }));

        manager.close().await;
        manager.closed().await;
        assert_eq!(transport.open_consumers(), 0);
    }
}
