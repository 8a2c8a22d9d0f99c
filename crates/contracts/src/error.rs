//! Layered error definitions
//!
//! Categorized by source: config / transport

use thiserror::Error;

use crate::{PhysicalTopic, Position};

/// Configuration error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ContractError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // Report the first offending field, sorted for deterministic output
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        match fields.first() {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("invalid value for '{field}'"));
                Self::config_validation(field.to_string(), message)
            }
            None => Self::config_validation("<unknown>", errors.to_string()),
        }
    }
}

/// Errors reported by a transport implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Subscribe or fetch failed; the caller decides on backoff
    #[error("transport unavailable for topic '{topic}': {message}")]
    Unavailable {
        topic: PhysicalTopic,
        message: String,
    },

    /// Requested position is no longer (or not yet) retrievable
    #[error(
        "position {requested} out of range for topic '{topic}' (earliest={earliest}, latest={latest})"
    )]
    PositionOutOfRange {
        topic: PhysicalTopic,
        requested: Position,
        earliest: Position,
        latest: Position,
    },

    /// Consumer handle used after close
    #[error("consumer for topic '{topic}' is closed")]
    Closed { topic: PhysicalTopic },
}

impl TransportError {
    /// Create transport unavailable error
    pub fn unavailable(topic: &PhysicalTopic, message: impl Into<String>) -> Self {
        Self::Unavailable {
            topic: topic.clone(),
            message: message.into(),
        }
    }

    pub fn topic(&self) -> &PhysicalTopic {
        match self {
            Self::Unavailable { topic, .. }
            | Self::PositionOutOfRange { topic, .. }
            | Self::Closed { topic } => topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::PositionOutOfRange {
            topic: "p0".into(),
            requested: Position::new(3),
            earliest: Position::new(10),
            latest: Position::new(20),
        };
        let msg = err.to_string();
        assert!(msg.contains("@3"), "got: {msg}");
        assert!(msg.contains("earliest=@10"), "got: {msg}");
        assert_eq!(err.topic(), "p0");
    }

    #[test]
    fn test_unavailable_helper() {
        let err = TransportError::unavailable(&"p1".into(), "broker down");
        assert!(matches!(err, TransportError::Unavailable { .. }));
        assert!(err.to_string().contains("broker down"));
    }
}
