//! SimulationProfile - config loader output for the `msgfan` harness
//!
//! Describes an in-memory workload: topics and the logical channels written
//! to them, a producer, and the subscriptions registered against the
//! dispatch client.

use serde::{Deserialize, Serialize};

use crate::{ChannelName, DispatchConfig, SubscriptionPolicy};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete simulation profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationProfile {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Dispatch policy
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Producer settings
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Physical topics and their logical channels
    pub topics: Vec<TopicConfig>,

    /// Subscriptions registered during the run
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Total run time in milliseconds
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
}

fn default_duration_ms() -> u64 {
    5_000
}

/// Producer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Records appended per second per topic
    #[serde(default = "default_rate")]
    pub records_per_second: f64,

    /// Payload size in bytes
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            records_per_second: default_rate(),
            payload_bytes: default_payload_bytes(),
        }
    }
}

fn default_rate() -> f64 {
    200.0
}

fn default_payload_bytes() -> usize {
    64
}

/// One physical topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Physical topic name
    pub name: String,

    /// Logical channels written round-robin to this topic
    pub channels: Vec<ChannelName>,

    /// Records written before any subscription is registered
    #[serde(default)]
    pub prefill: u64,

    /// Maximum retained records (None = unbounded)
    #[serde(default)]
    pub retention: Option<u64>,
}

/// One logical subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Logical channel name
    pub channel: ChannelName,

    /// Start policy when no position is given
    #[serde(default = "default_policy")]
    pub policy: SubscriptionPolicy,

    /// Explicit start position (checkpoint offset)
    #[serde(default)]
    pub position: Option<u64>,

    /// Delay before registering, in milliseconds
    #[serde(default)]
    pub start_after_ms: u64,

    /// Never drain the output queue (exercises slow consumer eviction)
    #[serde(default)]
    pub stalled: bool,
}

fn default_policy() -> SubscriptionPolicy {
    SubscriptionPolicy::Earliest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_profile_defaults() {
        let json = r#"{
            "topics": [{ "name": "p0", "channels": ["p0_v1"] }],
            "subscriptions": [{ "channel": "p0_v1" }]
        }"#;
        let profile: SimulationProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.version, ConfigVersion::V1);
        assert_eq!(profile.duration_ms, 5_000);
        assert_eq!(profile.producer.payload_bytes, 64);
        assert_eq!(profile.subscriptions[0].policy, SubscriptionPolicy::Earliest);
        assert!(!profile.subscriptions[0].stalled);
        assert_eq!(profile.dispatch, DispatchConfig::default());
    }
}
