//! Dispatch policy configuration shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Dispatch policy knobs
///
/// None of these can be derived from the transport interface, so they are
/// configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum position gap (in offsets) between a subscriber and the main
    /// dispatcher cursor before the subscriber is served by a solo dispatcher
    pub tolerance: u64,

    /// Capacity of every subscriber output queue (in batches)
    #[validate(range(min = 1, message = "target_queue_capacity must be >= 1"))]
    pub target_queue_capacity: usize,

    /// Bounded wait for a send into a subscriber queue before eviction
    #[validate(range(min = 1, message = "send_timeout_ms must be >= 1"))]
    pub send_timeout_ms: u64,

    /// Bounded wait for one transport fetch
    #[validate(range(min = 1, message = "poll_timeout_ms must be >= 1"))]
    pub poll_timeout_ms: u64,

    /// Period of the manager's merge / lifecycle check
    #[validate(range(min = 1, message = "check_interval_ms must be >= 1"))]
    pub check_interval_ms: u64,

    /// Grace period granted to each dispatcher on shutdown
    #[validate(range(min = 1, message = "shutdown_grace_ms must be >= 1"))]
    pub shutdown_grace_ms: u64,

    /// Upper bound on records per transport batch
    #[validate(range(min = 1, message = "max_batch_size must be >= 1"))]
    pub max_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tolerance: 1024,
            target_queue_capacity: 16,
            send_timeout_ms: 3_000,
            poll_timeout_ms: 100,
            check_interval_ms: 1_000,
            shutdown_grace_ms: 5_000,
            max_batch_size: 256,
        }
    }
}

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
