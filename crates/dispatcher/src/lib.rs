//! # Dispatcher
//!
//! Shared-consumer fan-out for multiplexed log topics.
//!
//! Responsibilities:
//! - Map logical subscriptions onto physical topics (`DispatchClient`)
//! - Share one transport consumer per topic across subscribers (`DispatcherManager`)
//! - Split far-off subscribers onto solo consumers and merge them back
//! - Isolate slow subscribers: bounded sends, then eviction
//!
//! Every subscriber sees batches whose ranges chain without gaps or
//! duplicates, whichever dispatcher happens to serve it.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod target;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::{DispatchClient, DispatchClientBuilder};
pub use dispatcher::{Dispatcher, DispatcherKind, DispatcherStats};
pub use error::{DispatchError, Result};
pub use handle::DispatcherHandle;
pub use manager::{DispatcherManager, ManagerStats, TargetStats};
pub use self::metrics::{DispatcherMetrics, MetricsSnapshot};
pub use target::{DetachReason, TargetReceiver};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
