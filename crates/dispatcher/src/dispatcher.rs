//! Dispatcher - one transport consumer fanned out to attached targets

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ::metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use contracts::{
    ChannelName, DispatchConfig, PhysicalTopic, Position, Record, RecordBatch, TransportConsumer,
    TransportError,
};

use crate::handle::DispatcherHandle;
use crate::lock;
use crate::metrics::{DispatcherMetrics, MetricsSnapshot};
use crate::target::{DetachReason, Delivery, Target};

/// Role of a dispatcher within its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherKind {
    /// Shared consumer most targets attach to
    Main,
    /// Dedicated consumer for targets too far from the main cursor
    Solo,
}

impl fmt::Display for DispatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Solo => f.write_str("solo"),
        }
    }
}

/// Point-in-time view of one dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub id: u64,
    pub kind: DispatcherKind,
    pub cursor: Position,
    pub targets: usize,
    pub stopped: bool,
    pub metrics: MetricsSnapshot,
}

struct DispatcherState {
    kind: DispatcherKind,
    targets: HashMap<ChannelName, Arc<Target>>,
    /// End of the last batch offered to every target
    cursor: Position,
    /// End of the batch currently being delivered
    in_flight: Option<Position>,
    stopped: bool,
}

impl DispatcherState {
    fn effective_cursor(&self) -> Position {
        self.in_flight.unwrap_or(self.cursor)
    }
}

/// State shared between a dispatcher task, its handle and the manager
pub(crate) struct DispatcherShared {
    id: u64,
    topic: PhysicalTopic,
    start: Position,
    state: Mutex<DispatcherState>,
    metrics: DispatcherMetrics,
}

impl DispatcherShared {
    fn new(id: u64, topic: PhysicalTopic, kind: DispatcherKind, start: Position) -> Self {
        Self {
            id,
            topic,
            start,
            state: Mutex::new(DispatcherState {
                kind,
                targets: HashMap::new(),
                cursor: start,
                in_flight: None,
                stopped: false,
            }),
            metrics: DispatcherMetrics::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn topic(&self) -> &PhysicalTopic {
        &self.topic
    }

    pub(crate) fn metrics(&self) -> &DispatcherMetrics {
        &self.metrics
    }

    pub(crate) fn kind(&self) -> DispatcherKind {
        lock(&self.state).kind
    }

    pub(crate) fn promote(&self) {
        lock(&self.state).kind = DispatcherKind::Main;
    }

    pub(crate) fn cursor(&self) -> Position {
        lock(&self.state).cursor
    }

    /// Position the next batch will continue from
    pub(crate) fn effective_cursor(&self) -> Position {
        lock(&self.state).effective_cursor()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    pub(crate) fn num_targets(&self) -> usize {
        lock(&self.state).targets.len()
    }

    /// Attach `target`, failing if the dispatcher already stopped
    pub(crate) fn attach(&self, target: Arc<Target>) -> bool {
        let mut state = lock(&self.state);
        if state.stopped {
            return false;
        }
        target.set_owner(self.id);
        state.targets.insert(target.name().clone(), target);
        true
    }

    /// Attach `target` if `position` lies within `tolerance` ahead of the
    /// effective cursor
    pub(crate) fn attach_within(
        &self,
        target: &Arc<Target>,
        position: Position,
        tolerance: u64,
    ) -> bool {
        let mut state = lock(&self.state);
        if state.stopped || !position.within_ahead(state.effective_cursor(), tolerance) {
            return false;
        }
        target.set_owner(self.id);
        state
            .targets
            .insert(target.name().clone(), Arc::clone(target));
        true
    }

    /// Remove exactly this target instance
    pub(crate) fn remove_target(&self, target: &Arc<Target>) -> bool {
        let mut state = lock(&self.state);
        match state.targets.get(target.name()) {
            Some(current) if Arc::ptr_eq(current, target) => {
                state.targets.remove(target.name());
                true
            }
            _ => false,
        }
    }

    /// Move every target whose covered position lies in
    /// `[main cursor, main cursor + tolerance]` onto `main`
    ///
    /// Locks self, then main.
    pub(crate) fn merge_into(&self, main: &DispatcherShared, tolerance: u64) -> Vec<ChannelName> {
        let mut solo = lock(&self.state);
        let mut main_state = lock(&main.state);
        if main_state.stopped {
            return Vec::new();
        }

        let base = main_state.effective_cursor();
        let movable: Vec<ChannelName> = solo
            .targets
            .values()
            .filter(|target| !target.is_detached() && target.covered().within_ahead(base, tolerance))
            .map(|target| target.name().clone())
            .collect();

        for name in &movable {
            if let Some(target) = solo.targets.remove(name) {
                target.set_owner(main.id);
                main_state.targets.insert(name.clone(), target);
            }
        }
        movable
    }

    /// Record `end` as in flight and snapshot the attached targets
    fn begin_batch(&self, end: Position) -> Vec<Arc<Target>> {
        let mut state = lock(&self.state);
        state.in_flight = Some(end);
        state.targets.values().cloned().collect()
    }

    fn finish_batch(&self, end: Position) {
        let mut state = lock(&self.state);
        state.cursor = end;
        state.in_flight = None;
    }

    pub(crate) fn mark_stopped(&self) {
        lock(&self.state).stopped = true;
    }

    fn drain(&self) -> Vec<Arc<Target>> {
        let mut state = lock(&self.state);
        state.stopped = true;
        state.targets.drain().map(|(_, target)| target).collect()
    }

    pub(crate) fn stats(&self) -> DispatcherStats {
        let state = lock(&self.state);
        DispatcherStats {
            id: self.id,
            kind: state.kind,
            cursor: state.cursor,
            targets: state.targets.len(),
            stopped: state.stopped,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Worker owning one transport consumer
///
/// Built by the manager with its first targets pre-attached, then moved into
/// its own task by [`spawn`](Self::spawn).
pub struct Dispatcher<C> {
    shared: Arc<DispatcherShared>,
    consumer: C,
    cancel: CancellationToken,
    send_timeout: Duration,
    poll_timeout: Duration,
}

impl<C: TransportConsumer + Sync + 'static> Dispatcher<C> {
    pub(crate) fn new(
        id: u64,
        kind: DispatcherKind,
        consumer: C,
        start: Position,
        config: &DispatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        let topic = consumer.topic().clone();
        Self {
            shared: Arc::new(DispatcherShared::new(id, topic, kind, start)),
            consumer,
            cancel,
            send_timeout: config.send_timeout(),
            poll_timeout: config.poll_timeout(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    /// Attach a target before the worker starts
    pub(crate) fn attach(&self, target: Arc<Target>) {
        self.shared.attach(target);
    }

    pub(crate) fn promote(&self) {
        self.shared.promote();
    }

    /// Release the consumer of a dispatcher that was never spawned
    pub(crate) async fn discard(mut self) {
        self.shared.mark_stopped();
        self.consumer.close().await;
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> DispatcherHandle {
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let worker = tokio::spawn(async move {
            self.run().await;
        });
        DispatcherHandle::new(shared, cancel, worker)
    }

    /// Run the fetch / fan-out loop until cancelled or the transport fails
    #[instrument(
        name = "dispatcher_run",
        skip(self),
        fields(topic = %self.shared.topic, id = self.shared.id)
    )]
    async fn run(mut self) {
        info!(kind = %self.shared.kind(), start = %self.shared.start, "Dispatcher started");
        gauge!("msgfan_dispatchers_active").increment(1.0);

        let failure = loop {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                fetched = self.consumer.next(self.poll_timeout) => fetched,
            };

            match fetched {
                Ok(Some(batch)) => {
                    if !self.dispatch(batch).await {
                        break None;
                    }
                }
                Ok(None) => trace!("idle poll"),
                Err(err) => break Some(err),
            }
        };

        match failure {
            Some(err) => {
                let reason = match err {
                    TransportError::PositionOutOfRange { .. } => DetachReason::PositionInvalid,
                    _ => DetachReason::TransportUnavailable,
                };
                let orphans = self.shared.drain();
                warn!(
                    error = %err,
                    %reason,
                    targets = orphans.len(),
                    "Fetch failed, detaching all targets"
                );
                for target in orphans {
                    self.record_eviction(&target, reason);
                }
            }
            None => self.shared.mark_stopped(),
        }

        self.consumer.close().await;
        gauge!("msgfan_dispatchers_active").decrement(1.0);
        info!(cursor = %self.shared.cursor(), "Dispatcher stopped");
    }

    /// Offer one transport batch to every attached target
    ///
    /// Returns `false` if cancelled part way through.
    async fn dispatch(&self, batch: RecordBatch) -> bool {
        let RecordBatch {
            begin,
            end,
            records,
            ..
        } = batch;
        self.shared.metrics.inc_fetched(records.len());

        let targets = self.shared.begin_batch(end);
        let mut groups: HashMap<ChannelName, Vec<Record>> = targets
            .iter()
            .map(|target| (target.name().clone(), Vec::new()))
            .collect();
        let mut unmatched = 0;
        for record in records {
            match groups.get_mut(&record.tag) {
                Some(group) => group.push(record),
                None => unmatched += 1,
            }
        }
        self.shared.metrics.add_unmatched(unmatched);

        let mut delivered = 0;
        for target in &targets {
            let records = groups.remove(target.name()).unwrap_or_default();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                outcome = target.deliver(end, records, self.send_timeout) => outcome,
            };

            match outcome {
                Delivery::Delivered(count) => delivered += count,
                Delivery::Skipped => {}
                Delivery::Detached => {
                    self.shared.remove_target(target);
                }
                Delivery::TimedOut => self.evict(target, DetachReason::SlowConsumerEvicted),
                Delivery::ReceiverGone => self.evict(target, DetachReason::ReceiverDropped),
            }
        }

        self.shared.finish_batch(end);
        self.shared.metrics.add_delivered(delivered);
        counter!("msgfan_records_dispatched_total", "topic" => self.shared.topic.to_string())
            .increment(delivered as u64);

        let fetched = self.shared.metrics.batches_fetched();
        if fetched.is_multiple_of(100) {
            debug!(batches = fetched, cursor = %end, "Dispatcher progress");
        }
        trace!(%begin, %end, targets = targets.len(), delivered, "batch dispatched");
        true
    }

    fn evict(&self, target: &Arc<Target>, reason: DetachReason) {
        self.shared.remove_target(target);
        self.record_eviction(target, reason);
    }

    fn record_eviction(&self, target: &Arc<Target>, reason: DetachReason) {
        if target.detach(reason) {
            self.shared.metrics.inc_evictions();
            counter!("msgfan_targets_evicted_total", "reason" => reason.as_str()).increment(1);
            warn!(
                target = %target.name(),
                %reason,
                covered = %target.covered(),
                "Target detached by dispatcher"
            );
        }
    }
}
