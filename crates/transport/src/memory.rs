//! In-memory log broker
//!
//! Every physical topic is an append-only log of records with contiguous
//! positions starting at 1. Consumers hold a checkpoint and wait on a
//! `watch` channel for appends past it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use contracts::{
    ChannelName, PhysicalTopic, Position, PositionBounds, Record, RecordBatch, Transport,
    TransportConsumer, TransportError,
};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::config::{MemoryTransportConfig, TransportMetrics};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Retained records of one topic
struct LogState {
    records: VecDeque<Record>,
    /// Checkpoint just before the oldest retained record
    earliest: Position,
    /// Position of the newest record ever appended
    latest: Position,
}

impl LogState {
    fn bounds(&self) -> PositionBounds {
        PositionBounds {
            earliest: self.earliest,
            latest: self.latest,
        }
    }

    /// Drop every record at or below `position`, returning the count
    fn trim_through(&mut self, position: Position) -> u64 {
        let position = position.min(self.latest);
        let mut trimmed = 0;
        while self
            .records
            .front()
            .is_some_and(|record| record.position <= position)
        {
            self.records.pop_front();
            trimmed += 1;
        }
        self.earliest = self.earliest.max(position);
        trimmed
    }

    /// Records strictly after `cursor`, at most `limit`
    fn read_after(&self, cursor: Position, limit: usize) -> Vec<Record> {
        let skip = cursor.offset().saturating_sub(self.earliest.offset()) as usize;
        self.records.iter().skip(skip).take(limit).cloned().collect()
    }
}

struct TopicLog {
    topic: PhysicalTopic,
    state: Mutex<LogState>,
    appended: watch::Sender<Position>,
}

impl TopicLog {
    fn new(topic: PhysicalTopic) -> Self {
        let (appended, _) = watch::channel(Position::ZERO);
        Self {
            topic,
            state: Mutex::new(LogState {
                records: VecDeque::new(),
                earliest: Position::ZERO,
                latest: Position::ZERO,
            }),
            appended,
        }
    }
}

struct Inner {
    config: MemoryTransportConfig,
    topics: Mutex<HashMap<PhysicalTopic, Arc<TopicLog>>>,
    metrics: TransportMetrics,
    fail_subscribe: AtomicBool,
    fail_fetch: Mutex<HashSet<PhysicalTopic>>,
}

impl Inner {
    fn log(&self, topic: &PhysicalTopic) -> Arc<TopicLog> {
        lock(&self.topics)
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(TopicLog::new(topic.clone())))
            .clone()
    }

    fn fetch_fails(&self, topic: &PhysicalTopic) -> bool {
        lock(&self.fail_fetch).contains(topic)
    }
}

/// In-memory [`Transport`]
///
/// Cheap to clone; clones share the same logs.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(MemoryTransportConfig::default())
    }
}

impl MemoryTransport {
    pub fn new(config: MemoryTransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                topics: Mutex::new(HashMap::new()),
                metrics: TransportMetrics::new(),
                fail_subscribe: AtomicBool::new(false),
                fail_fetch: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Append one record and return its position
    pub fn append(
        &self,
        topic: impl Into<PhysicalTopic>,
        tag: impl Into<ChannelName>,
        payload: impl Into<Bytes>,
    ) -> Position {
        let topic = topic.into();
        let log = self.inner.log(&topic);
        let position = {
            let mut state = lock(&log.state);
            let position = Position::new(state.latest.offset() + 1);
            state.records.push_back(Record {
                topic,
                tag: tag.into(),
                position,
                payload: payload.into(),
                timestamp_ms: now_ms(),
            });
            state.latest = position;

            if let Some(retention) = self.inner.config.retention {
                let excess = (state.records.len() as u64).saturating_sub(retention);
                if excess > 0 {
                    let through = Position::new(state.earliest.offset() + excess);
                    let trimmed = state.trim_through(through);
                    self.inner.metrics.record_trimmed(trimmed);
                }
            }
            position
        };

        self.inner.metrics.record_appended();
        log.appended.send_replace(position);
        trace!(topic = %log.topic, %position, "record appended");
        position
    }

    /// Discard every record at or below `position`
    ///
    /// Subscriptions and consumers whose checkpoint falls below the new
    /// earliest bound start failing with `PositionOutOfRange`.
    pub fn trim_before(&self, topic: &PhysicalTopic, position: Position) -> u64 {
        let log = self.inner.log(topic);
        let trimmed = lock(&log.state).trim_through(position);
        self.inner.metrics.record_trimmed(trimmed);
        debug!(%topic, %position, trimmed, "topic trimmed");
        trimmed
    }

    /// Make every subsequent subscribe call fail
    pub fn set_subscribe_failure(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make every fetch on `topic` fail
    pub fn set_fetch_failure(&self, topic: &PhysicalTopic, fail: bool) {
        let mut failing = lock(&self.inner.fail_fetch);
        if fail {
            failing.insert(topic.clone());
        } else {
            failing.remove(topic);
        }
    }

    /// Current bounds of `topic` without going through the async seam
    pub fn bounds(&self, topic: &PhysicalTopic) -> PositionBounds {
        let log = self.inner.log(topic);
        let bounds = lock(&log.state).bounds();
        bounds
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.inner.metrics
    }

    /// Consumers currently open
    pub fn open_consumers(&self) -> u64 {
        self.inner.metrics.snapshot().open_consumers
    }
}

impl Transport for MemoryTransport {
    type Consumer = MemoryConsumer;

    async fn position_bounds(&self, topic: &PhysicalTopic) -> Result<PositionBounds, TransportError> {
        Ok(self.bounds(topic))
    }

    #[instrument(name = "memory_subscribe", skip(self), fields(topic = %topic, %position))]
    async fn subscribe(
        &self,
        topic: &PhysicalTopic,
        position: Position,
    ) -> Result<MemoryConsumer, TransportError> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable(topic, "subscribe failure injected"));
        }

        let log = self.inner.log(topic);
        let bounds = lock(&log.state).bounds();
        if !bounds.contains(position) {
            return Err(TransportError::PositionOutOfRange {
                topic: topic.clone(),
                requested: position,
                earliest: bounds.earliest,
                latest: bounds.latest,
            });
        }

        let appended = log.appended.subscribe();
        self.inner.metrics.record_opened();
        debug!("consumer opened");

        Ok(MemoryConsumer {
            topic: topic.clone(),
            log,
            inner: self.inner.clone(),
            cursor: position,
            appended,
            closed: false,
        })
    }
}

/// Consumer handle returned by [`MemoryTransport::subscribe`]
pub struct MemoryConsumer {
    topic: PhysicalTopic,
    log: Arc<TopicLog>,
    inner: Arc<Inner>,
    cursor: Position,
    appended: watch::Receiver<Position>,
    closed: bool,
}

impl MemoryConsumer {
    /// Checkpoint of the last batch handed out
    pub fn cursor(&self) -> Position {
        self.cursor
    }

    fn try_read(&mut self) -> Result<Option<RecordBatch>, TransportError> {
        let state = lock(&self.log.state);
        if self.cursor < state.earliest {
            return Err(TransportError::PositionOutOfRange {
                topic: self.topic.clone(),
                requested: self.cursor,
                earliest: state.earliest,
                latest: state.latest,
            });
        }

        let records = state.read_after(self.cursor, self.inner.config.max_batch_size);
        let Some(last) = records.last() else {
            return Ok(None);
        };

        let batch = RecordBatch {
            topic: self.topic.clone(),
            begin: self.cursor,
            end: last.position,
            records,
        };
        self.cursor = batch.end;
        Ok(Some(batch))
    }
}

impl TransportConsumer for MemoryConsumer {
    fn topic(&self) -> &PhysicalTopic {
        &self.topic
    }

    async fn next(&mut self, timeout: Duration) -> Result<Option<RecordBatch>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                topic: self.topic.clone(),
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.fetch_fails(&self.topic) {
                return Err(TransportError::unavailable(&self.topic, "fetch failure injected"));
            }

            // Mark the current append as seen before reading so an append
            // racing with the read still wakes the wait below.
            self.appended.borrow_and_update();
            if let Some(batch) = self.try_read()? {
                self.inner.metrics.record_fetched();
                trace!(topic = %self.topic, begin = %batch.begin, end = %batch.end, "batch fetched");
                return Ok(Some(batch));
            }

            match tokio::time::timeout_at(deadline, self.appended.changed()).await {
                Ok(Ok(())) => continue,
                // Sender lives as long as the topic log, which we hold
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.metrics.record_closed();
            debug!(topic = %self.topic, cursor = %self.cursor, "consumer closed");
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.metrics.record_closed();
        }
    }
}
