//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate dispatch knobs and simulation profiles
//! - Serialize profiles back for `msgfan info`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let profile = ConfigLoader::load_from_path(Path::new("msgfan.toml")).unwrap();
//! println!("topics: {}", profile.topics.len());
//! ```

mod parser;
mod validator;

pub use contracts::{DispatchConfig, SimulationProfile};
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a simulation profile from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<SimulationProfile, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load a simulation profile from string
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<SimulationProfile, ContractError> {
        let profile: SimulationProfile = parser::parse(content, format)?;
        validator::validate(&profile)?;
        Ok(profile)
    }

    /// Load a standalone dispatch configuration from file path
    pub fn load_dispatch_from_path(path: &Path) -> Result<DispatchConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_dispatch_from_str(&content, format)
    }

    /// Load a standalone dispatch configuration from string
    pub fn load_dispatch_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DispatchConfig, ContractError> {
        let config: DispatchConfig = parser::parse(content, format)?;
        validator::validate_dispatch(&config)?;
        Ok(config)
    }

    /// Serialize a profile to TOML string
    pub fn to_toml(profile: &SimulationProfile) -> Result<String, ContractError> {
        toml::to_string_pretty(profile)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize a profile to JSON string
    pub fn to_json(profile: &SimulationProfile) -> Result<String, ContractError> {
        serde_json::to_string_pretty(profile)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}
