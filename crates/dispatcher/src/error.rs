//! Dispatch error types

use thiserror::Error;

use contracts::{ChannelName, PhysicalTopic, TransportError};

use crate::target::DetachReason;

/// Errors surfaced by the client, managers and subscription receivers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Subscription name already live on its physical topic
    #[error("subscription '{name}' is already registered on topic '{topic}'")]
    DuplicateRegistration {
        name: ChannelName,
        topic: PhysicalTopic,
    },

    /// Subscribe or fetch failed; not retried internally
    #[error("transport unavailable for topic '{topic}': {message}")]
    TransportUnavailable {
        topic: PhysicalTopic,
        message: String,
    },

    /// Start position missing or no longer retrievable
    #[error("invalid start position for '{name}': {message}")]
    PositionInvalid { name: ChannelName, message: String },

    /// Output queue stayed full past the send timeout
    #[error("subscription '{name}' evicted: consumer too slow")]
    SlowConsumerEvicted { name: ChannelName },

    /// Subscription ended for another reason
    #[error("subscription '{name}' detached: {reason}")]
    Detached {
        name: ChannelName,
        reason: DetachReason,
    },

    /// Manager retired while the call was in progress
    #[error("manager for topic '{topic}' is closed")]
    ManagerClosed { topic: PhysicalTopic },

    /// Client already closed
    #[error("dispatch client is closed")]
    ClientClosed,
}

impl DispatchError {
    pub fn duplicate(name: &ChannelName, topic: &PhysicalTopic) -> Self {
        Self::DuplicateRegistration {
            name: name.clone(),
            topic: topic.clone(),
        }
    }

    pub fn position_invalid(name: &ChannelName, message: impl Into<String>) -> Self {
        Self::PositionInvalid {
            name: name.clone(),
            message: message.into(),
        }
    }

    /// Map a transport failure raised while serving `name`
    pub fn from_transport(name: &ChannelName, err: TransportError) -> Self {
        match err {
            TransportError::PositionOutOfRange { .. } => {
                Self::position_invalid(name, err.to_string())
            }
            TransportError::Unavailable { topic, message } => {
                Self::TransportUnavailable { topic, message }
            }
            TransportError::Closed { ref topic } => Self::TransportUnavailable {
                topic: topic.clone(),
                message: err.to_string(),
            },
        }
    }

    /// Error reported to a receiver whose subscription ended with `reason`
    pub fn detached(name: &ChannelName, topic: &PhysicalTopic, reason: DetachReason) -> Self {
        match reason {
            DetachReason::SlowConsumerEvicted => Self::SlowConsumerEvicted { name: name.clone() },
            DetachReason::TransportUnavailable => Self::TransportUnavailable {
                topic: topic.clone(),
                message: "dispatcher stopped after a fetch failure".into(),
            },
            DetachReason::PositionInvalid => {
                Self::position_invalid(name, "read position fell out of retention")
            }
            reason => Self::Detached {
                name: name.clone(),
                reason,
            },
        }
    }
}

/// Dispatch Result type alias
pub type Result<T> = std::result::Result<T, DispatchError>;
