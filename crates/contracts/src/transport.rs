//! Transport seam - the queue broker as seen by dispatchers
//!
//! Dispatchers never talk to a broker directly. They open one consumer per
//! physical topic through [`Transport`] and pull ordered batches from it.

use std::future::Future;
use std::time::Duration;

use crate::{PhysicalTopic, Position, PositionBounds, RecordBatch, TransportError};

/// Consumer handle subscribed to one physical topic
///
/// Batches come back in log order and chain: the first batch begins at the
/// subscription position and each following batch begins where the previous
/// one ended.
#[trait_variant::make(TransportConsumer: Send)]
pub trait LocalTransportConsumer {
    /// Topic this consumer reads
    fn topic(&self) -> &PhysicalTopic;

    /// Pull the next batch, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    /// Fetch failure; the consumer should be considered dead afterwards
    async fn next(&mut self, timeout: Duration) -> Result<Option<RecordBatch>, TransportError>;

    /// Release the subscription
    async fn close(&mut self);
}

/// Consumer factory for a queue transport
///
/// Shared by every manager of a client, so implementations must be cheap to
/// call concurrently.
pub trait Transport: Send + Sync + 'static {
    /// Consumer handle type
    ///
    /// `Sync` lets a dispatcher task hold a shared borrow of its consumer
    /// across awaits.
    type Consumer: TransportConsumer + Sync + 'static;

    /// Currently retrievable range of a topic
    fn position_bounds(
        &self,
        topic: &PhysicalTopic,
    ) -> impl Future<Output = Result<PositionBounds, TransportError>> + Send;

    /// Subscribe to `topic`, yielding records strictly after `position`
    ///
    /// # Errors
    /// - `Unavailable` when the broker cannot be reached
    /// - `PositionOutOfRange` when `position` is outside the retained range
    fn subscribe(
        &self,
        topic: &PhysicalTopic,
        position: Position,
    ) -> impl Future<Output = Result<Self::Consumer, TransportError>> + Send;
}
