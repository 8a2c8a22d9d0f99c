//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::SimulationProfile;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ProfileSummary>,
}

#[derive(Serialize)]
struct ProfileSummary {
    version: String,
    topic_count: usize,
    channel_count: usize,
    subscription_count: usize,
    tolerance: u64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating profile");

    let result = validate_profile(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Profile validation failed")
    }
}

fn validate_profile(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(profile) => {
            let warnings = collect_warnings(&profile);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ProfileSummary {
                    version: format!("{:?}", profile.version),
                    topic_count: profile.topics.len(),
                    channel_count: profile.topics.iter().map(|t| t.channels.len()).sum(),
                    subscription_count: profile.subscriptions.len(),
                    tolerance: profile.dispatch.tolerance,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues
fn collect_warnings(profile: &SimulationProfile) -> Vec<String> {
    let mut warnings = Vec::new();

    if profile.subscriptions.is_empty() {
        warnings.push("No subscriptions configured - nothing will be dispatched".to_string());
    }

    for sub in &profile.subscriptions {
        if sub.start_after_ms >= profile.duration_ms {
            warnings.push(format!(
                "Subscription '{}' starts after the run ends ({} ms >= {} ms)",
                sub.channel, sub.start_after_ms, profile.duration_ms
            ));
        }
    }

    let dispatch = &profile.dispatch;
    if dispatch.poll_timeout_ms >= dispatch.check_interval_ms {
        warnings.push(format!(
            "poll_timeout_ms ({}) >= check_interval_ms ({}) - merges may lag behind fetches",
            dispatch.poll_timeout_ms, dispatch.check_interval_ms
        ));
    }

    let stalled = profile.subscriptions.iter().filter(|s| s.stalled).count();
    if stalled > 0 {
        warnings.push(format!(
            "{stalled} stalled subscription(s) will be evicted after {} ms",
            dispatch.send_timeout_ms
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Profile is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Topics: {}", summary.topic_count);
            println!("  Channels: {}", summary.channel_count);
            println!("  Subscriptions: {}", summary.subscription_count);
            println!("  Tolerance: {}", summary.tolerance);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Profile is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
