//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// msgfan - shared-consumer fan-out for multiplexed log topics
#[derive(Parser, Debug)]
#[command(
    name = "msgfan",
    author,
    version,
    about = "Shared-consumer dispatch simulator",
    long_about = "Runs a simulated workload through the msgfan dispatch client.\n\n\
                  Writes records to in-memory topics, registers the configured \n\
                  subscriptions and reports what every subscriber received."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MSGFAN_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "MSGFAN_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation profile
    Run(RunArgs),

    /// Validate a profile without running it
    Validate(ValidateArgs),

    /// Display profile information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the simulation profile (TOML or JSON)
    #[arg(short, long, default_value = "msgfan.toml", env = "MSGFAN_CONFIG")]
    pub config: PathBuf,

    /// Override the run duration in milliseconds
    #[arg(long, env = "MSGFAN_DURATION_MS")]
    pub duration_ms: Option<u64>,

    /// Override the producer rate (records per second per topic)
    #[arg(long, env = "MSGFAN_RATE")]
    pub rate: Option<f64>,

    /// Override the split/merge tolerance (offsets)
    #[arg(long, env = "MSGFAN_TOLERANCE")]
    pub tolerance: Option<u64>,

    /// Validate the profile and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MSGFAN_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the profile to validate
    #[arg(short, long, default_value = "msgfan.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to the profile
    #[arg(short, long, default_value = "msgfan.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show every subscription
    #[arg(long)]
    pub subscriptions: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "msgfan",
            "run",
            "--config",
            "profile.json",
            "--duration-ms",
            "250",
            "--tolerance",
            "8",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("profile.json"));
                assert_eq!(args.duration_ms, Some(250));
                assert_eq!(args.tolerance, Some(8));
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_log_format_maps_to_observability() {
        let cli = Cli::try_parse_from(["msgfan", "--log-format", "json", "validate"]).unwrap();
        assert_eq!(
            observability::LogFormat::from(cli.log_format),
            observability::LogFormat::Json
        );
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["msgfan", "-q", "-v", "validate"]);
        assert!(result.is_err());
    }
}
