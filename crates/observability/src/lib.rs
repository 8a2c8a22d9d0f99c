//! # Observability
//!
//! Tracing and Prometheus setup for msgfan binaries.
//!
//! ## Features
//!
//! - Tracing initialisation (JSON/Pretty/Compact)
//! - Prometheus exporter
//! - Delivery metric helpers and per-subscription aggregation
//!
//! ## Example
//!
//! ```ignore
//! use observability::{init_with_config, metrics, ObservabilityConfig};
//!
//! init_with_config(ObservabilityConfig::from_verbosity(1, false))?;
//!
//! while let Some(batch) = receiver.recv().await {
//!     metrics::record_batch_received(receiver.name(), &batch, 0);
//! }
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_batch_received, record_manager_stats, record_registration,
    record_subscriber_detached, DeliveryAggregator, DeliverySummary, RunningStats, StatsSummary,
};

/// Observability settings
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Use `log_level` even when `RUST_LOG` is set
    pub pin_log_level: bool,
    /// Prometheus port (None = disabled)
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_level: "info".to_string(),
            pin_log_level: false,
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// Map `-v` counts and `--quiet` onto a filter
    ///
    /// Quiet pins the filter to `warn`; otherwise `RUST_LOG` still wins.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let (log_level, pin_log_level) = match (quiet, verbose) {
            (true, _) => ("warn", true),
            (false, 0) => ("info", false),
            (false, 1) => ("debug", false),
            (false, _) => ("trace", false),
        };
        Self {
            log_level: log_level.to_string(),
            pin_log_level,
            ..Default::default()
        }
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    fn filter(&self) -> EnvFilter {
        if self.pin_log_level {
            return EnvFilter::new(&self.log_level);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON
    Json,
    /// Human readable, multi-line
    #[default]
    Pretty,
    /// Single line
    Compact,
}

/// Install the tracing subscriber and, if a port is set, the Prometheus
/// recorder
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        log_level = %config.log_level,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// Install only the Prometheus recorder
///
/// For callers whose tracing is set up elsewhere.
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
