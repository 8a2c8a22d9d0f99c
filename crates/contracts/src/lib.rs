//! # Contracts
//!
//! Frozen interface contracts shared by every msgfan crate: identifiers,
//! positions, record batches, the transport seam and dispatch configuration.
//! Business crates depend on this crate only, never the other way round.
//!
//! ## Position Model
//! - A `Position` is a checkpoint inside one physical topic's log
//! - Subscribing at `p` yields records strictly after `p`
//! - A batch covers `(begin, end]`; consecutive batches chain `next.begin == prev.end`

mod channel;
mod dispatch_config;
mod error;
mod naming;
mod position;
mod record;
mod simulation;
mod transport;

pub use channel::{ChannelName, PhysicalTopic};
pub use dispatch_config::*;
pub use error::*;
pub use naming::{SuffixNaming, TopicNaming};
pub use position::{Position, PositionBounds, SubscriptionPolicy};
pub use record::{Record, RecordBatch};
pub use simulation::*;
pub use transport::{LocalTransportConsumer, Transport, TransportConsumer};
