//! `run` command implementation.

use anyhow::{Context, Result};
use tracing::{info, warn};

use contracts::SimulationProfile;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Simulation, SimulationConfig};

/// Execute the `run` command
pub async fn run_simulation(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading profile");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut profile = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load profile from {}", args.config.display()))?;

    apply_overrides(&mut profile, args);

    info!(
        topics = profile.topics.len(),
        subscriptions = profile.subscriptions.len(),
        tolerance = profile.dispatch.tolerance,
        duration_ms = profile.duration_ms,
        "Profile loaded"
    );

    if args.dry_run {
        info!("Dry run mode - profile is valid, exiting");
        print_profile_summary(&profile);
        return Ok(());
    }

    let simulation = Simulation::new(SimulationConfig {
        profile,
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    });

    let shutdown_signal = setup_shutdown_signal();

    tokio::select! {
        result = simulation.run() => {
            let stats = result.context("Simulation failed")?;
            info!(
                produced = stats.records_produced,
                duration_secs = stats.duration.as_secs_f64(),
                delivered_per_sec = format!("{:.1}", stats.delivered_per_sec()),
                "Simulation completed"
            );
            stats.print_summary();

            let broken = stats.inconsistent();
            if broken > 0 {
                anyhow::bail!("{broken} subscription(s) saw gaps or overlaps");
            }
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, stopping simulation...");
        }
    }

    info!("msgfan finished");
    Ok(())
}

fn apply_overrides(profile: &mut SimulationProfile, args: &RunArgs) {
    if let Some(duration_ms) = args.duration_ms {
        info!(duration_ms, "Overriding run duration from CLI");
        profile.duration_ms = duration_ms;
    }
    if let Some(rate) = args.rate {
        info!(rate, "Overriding producer rate from CLI");
        profile.producer.records_per_second = rate;
    }
    if let Some(tolerance) = args.tolerance {
        info!(tolerance, "Overriding tolerance from CLI");
        profile.dispatch.tolerance = tolerance;
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_profile_summary(profile: &SimulationProfile) {
    println!("\n=== Profile Summary ===\n");
    println!("Dispatch:");
    println!("  Tolerance: {} offsets", profile.dispatch.tolerance);
    println!(
        "  Queue capacity: {} batches, send timeout {} ms",
        profile.dispatch.target_queue_capacity, profile.dispatch.send_timeout_ms
    );
    println!(
        "\nProducer: {} records/s per topic, {} byte payloads",
        profile.producer.records_per_second, profile.producer.payload_bytes
    );

    println!("\nTopics ({}):", profile.topics.len());
    for topic in &profile.topics {
        println!(
            "  - {} ({} channels, prefill {})",
            topic.name,
            topic.channels.len(),
            topic.prefill
        );
    }

    println!("\nSubscriptions ({}):", profile.subscriptions.len());
    for sub in &profile.subscriptions {
        println!("  - {}", describe_subscription(sub));
    }

    println!();
}

pub(crate) fn describe_subscription(sub: &contracts::SubscriptionConfig) -> String {
    let start = match sub.position {
        Some(position) => format!("@{position}"),
        None => format!("{:?}", sub.policy).to_lowercase(),
    };
    let mut line = format!("{} from {}", sub.channel, start);
    if sub.start_after_ms > 0 {
        line.push_str(&format!(" after {} ms", sub.start_after_ms));
    }
    if sub.stalled {
        line.push_str(" (stalled)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SubscriptionConfig, SubscriptionPolicy};
    use std::path::PathBuf;

    fn args() -> RunArgs {
        RunArgs {
            config: PathBuf::from("msgfan.toml"),
            duration_ms: Some(10),
            rate: None,
            tolerance: Some(4),
            dry_run: false,
            metrics_port: 0,
        }
    }

    #[test]
    fn test_apply_overrides() {
        let mut profile: SimulationProfile = serde_json::from_str(
            r#"{ "topics": [{ "name": "p0", "channels": ["p0_v1"] }] }"#,
        )
        .unwrap();
        apply_overrides(&mut profile, &args());

        assert_eq!(profile.duration_ms, 10);
        assert_eq!(profile.dispatch.tolerance, 4);
        assert_eq!(profile.producer.records_per_second, 200.0);
    }

    #[test]
    fn test_describe_subscription() {
        let sub = SubscriptionConfig {
            channel: "p0_v1".into(),
            policy: SubscriptionPolicy::Latest,
            position: None,
            start_after_ms: 50,
            stalled: true,
        };
        assert_eq!(describe_subscription(&sub), "p0_v1 from latest after 50 ms (stalled)");
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args();
        args.config = dir.path().join("absent.toml");

        let err = run_simulation(&args).await.unwrap_err();
        assert!(err.to_string().contains("not found"), "got: {err}");
    }
}
