//! # msgfan CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Profile loading and validation
//! - Simulated workloads over the in-memory transport
//! - Graceful shutdown handling

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_simulation, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "msgfan starting");

    let result = match &cli.command {
        Commands::Run(args) => run_simulation(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

fn init_logging(cli: &Cli) -> Result<()> {
    let config = ObservabilityConfig::from_verbosity(cli.verbose, cli.quiet)
        .with_log_format(cli.log_format.clone().into());
    observability::init_with_config(config)
}
