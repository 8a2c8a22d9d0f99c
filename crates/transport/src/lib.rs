//! # Transport
//!
//! In-memory log transport implementing the `contracts::Transport` seam.
//!
//! Responsibilities:
//! - Append records to per-topic ordered logs (positions start at 1)
//! - Retention trimming, which makes old checkpoints unretrievable
//! - Consumers that pull chained batches of at most `max_batch_size` records
//! - Failure injection for subscribe and fetch
//!
//! ## Usage Example
//!
//! ```
//! use contracts::{Position, Transport, TransportConsumer};
//! use std::time::Duration;
//! use transport::MemoryTransport;
//!
//! # tokio_test_block(async {
//! let transport = MemoryTransport::default();
//! transport.append("p0", "p0_v1", "hello");
//!
//! let mut consumer = transport.subscribe(&"p0".into(), Position::ZERO).await.unwrap();
//! let batch = consumer.next(Duration::from_millis(10)).await.unwrap().unwrap();
//! assert_eq!(batch.records.len(), 1);
//! assert_eq!(batch.end, Position::new(1));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod config;
mod memory;

pub use config::{MemoryTransportConfig, MetricsSnapshot, TransportMetrics};
pub use memory::{MemoryConsumer, MemoryTransport};
