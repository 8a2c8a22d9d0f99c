//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{SimulationProfile, SuffixNaming, TopicNaming};

use super::run::describe_subscription;
use crate::cli::InfoArgs;

/// Profile info for JSON output
#[derive(Serialize)]
struct ProfileInfo {
    version: String,
    duration_ms: u64,
    dispatch: contracts::DispatchConfig,
    topics: Vec<TopicInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Serialize)]
struct TopicInfo {
    name: String,
    channels: Vec<String>,
    prefill: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    retention: Option<u64>,
    /// Subscriptions multiplexed onto this topic
    subscribers: usize,
}

#[derive(Serialize)]
struct SubscriptionInfo {
    channel: String,
    topic: String,
    start: String,
    start_after_ms: u64,
    stalled: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading profile info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let profile = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load profile from {}", args.config.display()))?;

    if args.json {
        let info = build_profile_info(&profile, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize profile info")?;
        println!("{}", json);
    } else {
        print_profile_info(&profile, args);
    }

    Ok(())
}

fn subscribers_of(profile: &SimulationProfile, topic: &str) -> usize {
    profile
        .subscriptions
        .iter()
        .filter(|s| SuffixNaming.physical_topic(&s.channel) == topic)
        .count()
}

fn build_profile_info(profile: &SimulationProfile, args: &InfoArgs) -> ProfileInfo {
    let topics = profile
        .topics
        .iter()
        .map(|t| TopicInfo {
            name: t.name.clone(),
            channels: t.channels.iter().map(|c| c.to_string()).collect(),
            prefill: t.prefill,
            retention: t.retention,
            subscribers: subscribers_of(profile, &t.name),
        })
        .collect();

    let subscriptions = if args.subscriptions {
        profile
            .subscriptions
            .iter()
            .map(|s| SubscriptionInfo {
                channel: s.channel.to_string(),
                topic: SuffixNaming.physical_topic(&s.channel).to_string(),
                start: match s.position {
                    Some(position) => format!("@{position}"),
                    None => format!("{:?}", s.policy).to_lowercase(),
                },
                start_after_ms: s.start_after_ms,
                stalled: s.stalled,
            })
            .collect()
    } else {
        Vec::new()
    };

    ProfileInfo {
        version: format!("{:?}", profile.version),
        duration_ms: profile.duration_ms,
        dispatch: profile.dispatch.clone(),
        topics,
        subscriptions,
    }
}

fn print_profile_info(profile: &SimulationProfile, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    msgfan Profile                            ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let dispatch = &profile.dispatch;
    println!("⚙️  Dispatch");
    println!("   ├─ Version: {:?}", profile.version);
    println!("   ├─ Tolerance: {} offsets", dispatch.tolerance);
    println!("   ├─ Queue capacity: {} batches", dispatch.target_queue_capacity);
    println!("   ├─ Send timeout: {} ms", dispatch.send_timeout_ms);
    println!("   ├─ Check interval: {} ms", dispatch.check_interval_ms);
    println!("   └─ Max batch size: {}", dispatch.max_batch_size);

    println!("\n🗂  Topics ({})", profile.topics.len());
    for (i, topic) in profile.topics.iter().enumerate() {
        let is_last = i == profile.topics.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({} channels, {} subscribers)",
            prefix,
            topic.name,
            topic.channels.len(),
            subscribers_of(profile, &topic.name)
        );
        match topic.retention {
            Some(retention) => println!("   {}  └─ Retention: {} records", child_prefix, retention),
            None => println!("   {}  └─ Retention: unbounded", child_prefix),
        }
    }

    if args.subscriptions && !profile.subscriptions.is_empty() {
        println!("\n📥 Subscriptions ({})", profile.subscriptions.len());
        for (i, sub) in profile.subscriptions.iter().enumerate() {
            let is_last = i == profile.subscriptions.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            println!("   {} {}", prefix, describe_subscription(sub));
        }
    }

    println!(
        "\n⏱  Run: {} ms at {} records/s per topic",
        profile.duration_ms, profile.producer.records_per_second
    );
    println!();
}
