//! Configuration parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use serde::de::DeserializeOwned;

use contracts::ContractError;

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse `content` in the given format
pub fn parse<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DispatchConfig, SimulationProfile, SubscriptionPolicy};

    #[test]
    fn test_parse_toml_profile() {
        let content = r#"
duration_ms = 2000

[dispatch]
tolerance = 64

[[topics]]
name = "p0"
channels = ["p0_v1", "p0_v2"]
prefill = 500

[[subscriptions]]
channel = "p0_v1"

[[subscriptions]]
channel = "p0_v2"
policy = "latest"
start_after_ms = 250
"#;
        let profile: SimulationProfile = parse_toml(content).unwrap();
        assert_eq!(profile.duration_ms, 2000);
        assert_eq!(profile.dispatch.tolerance, 64);
        assert_eq!(profile.topics[0].channels.len(), 2);
        assert_eq!(profile.topics[0].prefill, 500);
        assert_eq!(profile.subscriptions[1].policy, SubscriptionPolicy::Latest);
        assert_eq!(profile.subscriptions[1].start_after_ms, 250);
    }

    #[test]
    fn test_parse_json_dispatch_config() {
        let content = r#"{ "tolerance": 16, "send_timeout_ms": 500 }"#;
        let config: DispatchConfig = parse_json(content).unwrap();
        assert_eq!(config.tolerance, 16);
        assert_eq!(config.send_timeout_ms, 500);
        assert_eq!(config.max_batch_size, DispatchConfig::default().max_batch_size);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result: Result<SimulationProfile, _> = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_parse_missing_topics() {
        let result: Result<SimulationProfile, _> = parse_json("{}");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("topics"), "got: {err}");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
