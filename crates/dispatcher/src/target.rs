//! Target - per-subscription delivery context
//!
//! A target is shared between the manager registry and whichever dispatcher
//! currently serves it. During a merge two dispatchers may briefly hold the
//! same target; the delivery lock plus the covered position make sure the
//! subscriber still sees every record exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use contracts::{ChannelName, PhysicalTopic, Position, Record, RecordBatch};

use crate::error::{DispatchError, Result};
use crate::lock;

/// Why a subscription stopped receiving batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachReason {
    /// Caller deregistered the subscription
    Deregistered,
    /// Output queue stayed full past the send timeout
    SlowConsumerEvicted,
    /// Caller dropped its receiver
    ReceiverDropped,
    /// Serving dispatcher hit a fetch error
    TransportUnavailable,
    /// Serving dispatcher's position fell out of retention
    PositionInvalid,
    /// Owning manager shut down
    ManagerClosed,
}

impl DetachReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deregistered => "deregistered",
            Self::SlowConsumerEvicted => "slow_consumer_evicted",
            Self::ReceiverDropped => "receiver_dropped",
            Self::TransportUnavailable => "transport_unavailable",
            Self::PositionInvalid => "position_invalid",
            Self::ManagerClosed => "manager_closed",
        }
    }
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of offering one batch to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Batch accepted; carries the number of records sent
    Delivered(usize),
    /// Batch ends at or below the covered position
    Skipped,
    /// Target was detached before or during the send
    Detached,
    /// Queue stayed full for the whole send timeout
    TimedOut,
    /// Receiver side is gone
    ReceiverGone,
}

pub(crate) struct Target {
    name: ChannelName,
    topic: PhysicalTopic,
    start: Position,
    /// Taken on detach so the queue closes once in-flight sends finish
    tx: Mutex<Option<mpsc::Sender<RecordBatch>>>,
    /// End of the last batch handed to the queue
    covered: AtomicU64,
    /// Id of the dispatcher currently serving this target
    owner: AtomicU64,
    /// Serialises deliveries from two dispatchers during a merge
    delivery: tokio::sync::Mutex<()>,
    detached: CancellationToken,
    reason: Arc<OnceLock<DetachReason>>,
    batches: AtomicU64,
    records: AtomicU64,
}

impl Target {
    pub(crate) fn new(
        name: ChannelName,
        topic: PhysicalTopic,
        start: Position,
        capacity: usize,
    ) -> (Arc<Self>, TargetReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let reason = Arc::new(OnceLock::new());

        let target = Arc::new(Self {
            name: name.clone(),
            topic: topic.clone(),
            start,
            tx: Mutex::new(Some(tx)),
            covered: AtomicU64::new(start.offset()),
            owner: AtomicU64::new(0),
            delivery: tokio::sync::Mutex::new(()),
            detached: CancellationToken::new(),
            reason: Arc::clone(&reason),
            batches: AtomicU64::new(0),
            records: AtomicU64::new(0),
        });

        let receiver = TargetReceiver {
            name,
            topic,
            start,
            rx,
            reason,
        };
        (target, receiver)
    }

    pub(crate) fn name(&self) -> &ChannelName {
        &self.name
    }

    pub(crate) fn start(&self) -> Position {
        self.start
    }

    pub(crate) fn covered(&self) -> Position {
        Position::new(self.covered.load(Ordering::Acquire))
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    pub(crate) fn set_owner(&self, dispatcher_id: u64) {
        self.owner.store(dispatcher_id, Ordering::Release);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.reason.get().is_some()
    }

    pub(crate) fn reason(&self) -> Option<DetachReason> {
        self.reason.get().copied()
    }

    pub(crate) fn delivered(&self) -> (u64, u64) {
        (
            self.batches.load(Ordering::Relaxed),
            self.records.load(Ordering::Relaxed),
        )
    }

    /// Detach with `reason`; the first reason wins
    ///
    /// Returns `true` if this call performed the detach.
    pub(crate) fn detach(&self, reason: DetachReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        lock(&self.tx).take();
        self.detached.cancel();
        true
    }

    /// Offer the records of a transport batch ending at `end`
    ///
    /// `records` are this target's records of the batch, in log order. Only
    /// records above the covered position are sent and the outgoing batch
    /// begins at the covered position, so consecutive deliveries chain even
    /// when they come from different dispatchers.
    pub(crate) async fn deliver(
        &self,
        end: Position,
        records: Vec<Record>,
        send_timeout: Duration,
    ) -> Delivery {
        let _guard = tokio::select! {
            biased;
            _ = self.detached.cancelled() => return Delivery::Detached,
            guard = self.delivery.lock() => guard,
        };

        let covered = self.covered();
        if end <= covered {
            return Delivery::Skipped;
        }
        let tx = lock(&self.tx).clone();
        let Some(tx) = tx else {
            return Delivery::Detached;
        };

        let records: Vec<Record> = records
            .into_iter()
            .filter(|record| record.position > covered)
            .collect();
        let count = records.len();
        let batch = RecordBatch {
            topic: self.topic.clone(),
            begin: covered,
            end,
            records,
        };

        tokio::select! {
            biased;
            _ = self.detached.cancelled() => Delivery::Detached,
            sent = tokio::time::timeout(send_timeout, tx.send(batch)) => match sent {
                Ok(Ok(())) => {
                    self.covered.store(end.offset(), Ordering::Release);
                    self.batches.fetch_add(1, Ordering::Relaxed);
                    self.records.fetch_add(count as u64, Ordering::Relaxed);
                    Delivery::Delivered(count)
                }
                Ok(Err(_)) => Delivery::ReceiverGone,
                Err(_) => Delivery::TimedOut,
            },
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("covered", &self.covered())
            .field("owner", &self.owner())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Caller side of a registered subscription
///
/// Yields batches in position order. Once the subscription is detached the
/// remaining buffered batches are still returned, then `recv` yields `None`
/// and [`close_reason`](Self::close_reason) tells why.
pub struct TargetReceiver {
    name: ChannelName,
    topic: PhysicalTopic,
    start: Position,
    rx: mpsc::Receiver<RecordBatch>,
    reason: Arc<OnceLock<DetachReason>>,
}

impl TargetReceiver {
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn topic(&self) -> &PhysicalTopic {
        &self.topic
    }

    /// Resolved start position; the first batch begins here
    pub fn start(&self) -> Position {
        self.start
    }

    pub async fn recv(&mut self) -> Option<RecordBatch> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RecordBatch> {
        self.rx.try_recv().ok()
    }

    /// Batches currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Why the subscription ended, if it has
    pub fn close_reason(&self) -> Option<DetachReason> {
        self.reason.get().copied()
    }

    /// Like [`recv`](Self::recv) but reports end of stream as an error
    pub async fn next_batch(&mut self) -> Result<RecordBatch> {
        match self.rx.recv().await {
            Some(batch) => Ok(batch),
            None => {
                let reason = self.close_reason().unwrap_or(DetachReason::ManagerClosed);
                Err(DispatchError::detached(&self.name, &self.topic, reason))
            }
        }
    }
}

impl fmt::Debug for TargetReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetReceiver")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("start", &self.start)
            .field("buffered", &self.rx.len())
            .field("reason", &self.close_reason())
            .finish()
    }
}
