//! Configuration validation
//!
//! Rules:
//! - dispatch knobs pass their range checks
//! - at least one topic, topic names unique and non-empty
//! - every channel derives its own topic name and is declared once
//! - subscriptions reference declared channels and can resolve a start
//! - producer rate is positive and finite, retention non-zero

use std::collections::HashSet;

use contracts::{
    ContractError, DispatchConfig, SimulationProfile, SubscriptionPolicy, SuffixNaming,
    TopicNaming,
};
use validator::Validate;

/// Validate a simulation profile, returning the first error encountered
pub fn validate(profile: &SimulationProfile) -> Result<(), ContractError> {
    validate_dispatch(&profile.dispatch)?;
    validate_producer(profile)?;
    validate_topics(profile)?;
    validate_subscriptions(profile)?;
    Ok(())
}

/// Range checks declared on `DispatchConfig`
pub fn validate_dispatch(config: &DispatchConfig) -> Result<(), ContractError> {
    config.validate()?;
    Ok(())
}

fn validate_producer(profile: &SimulationProfile) -> Result<(), ContractError> {
    let rate = profile.producer.records_per_second;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ContractError::config_validation(
            "producer.records_per_second",
            format!("records_per_second must be > 0, got {rate}"),
        ));
    }
    if profile.duration_ms == 0 {
        return Err(ContractError::config_validation(
            "duration_ms",
            "duration_ms must be >= 1",
        ));
    }
    Ok(())
}

fn validate_topics(profile: &SimulationProfile) -> Result<(), ContractError> {
    if profile.topics.is_empty() {
        return Err(ContractError::config_validation(
            "topics",
            "at least one topic is required",
        ));
    }

    let mut names = HashSet::new();
    let mut channels = HashSet::new();
    for (idx, topic) in profile.topics.iter().enumerate() {
        if topic.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("topics[{idx}].name"),
                "topic name cannot be empty",
            ));
        }
        if !names.insert(topic.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("topics[name={}]", topic.name),
                "duplicate topic name",
            ));
        }
        if topic.channels.is_empty() {
            return Err(ContractError::config_validation(
                format!("topics[{}].channels", topic.name),
                "topic needs at least one channel",
            ));
        }
        if topic.retention == Some(0) {
            return Err(ContractError::config_validation(
                format!("topics[{}].retention", topic.name),
                "retention must be >= 1 when set",
            ));
        }

        for channel in &topic.channels {
            let derived = SuffixNaming.physical_topic(channel);
            if derived != topic.name {
                return Err(ContractError::config_validation(
                    format!("topics[{}].channels[{channel}]", topic.name),
                    format!("channel maps to topic '{derived}', not '{}'", topic.name),
                ));
            }
            if !channels.insert(channel.as_str()) {
                return Err(ContractError::config_validation(
                    format!("topics[{}].channels[{channel}]", topic.name),
                    "duplicate channel",
                ));
            }
        }
    }
    Ok(())
}

fn validate_subscriptions(profile: &SimulationProfile) -> Result<(), ContractError> {
    let declared: HashSet<_> = profile
        .topics
        .iter()
        .flat_map(|t| t.channels.iter().map(|c| c.as_str()))
        .collect();

    for (idx, sub) in profile.subscriptions.iter().enumerate() {
        if !declared.contains(sub.channel.as_str()) {
            return Err(ContractError::config_validation(
                format!("subscriptions[{idx}].channel"),
                format!("channel '{}' not declared by any topic", sub.channel),
            ));
        }
        if sub.position.is_none() && sub.policy == SubscriptionPolicy::Unknown {
            return Err(ContractError::config_validation(
                format!("subscriptions[{idx}].position"),
                "policy 'unknown' requires an explicit position",
            ));
        }
    }
    Ok(())
}
