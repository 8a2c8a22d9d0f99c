//! Error types for the simulation pipeline.

use dispatcher::DispatchError;
use thiserror::Error;

/// Simulation errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Profile file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Every subscription failed to register
    #[error("No subscription could be registered: {source}")]
    Registration {
        #[source]
        source: DispatchError,
    },

    /// A simulation task panicked or was aborted
    #[error("Simulation task failed: {message}")]
    Task { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, CliError>;
