//! # Config Loader
//!
//! Loads the bus configuration: source priorities, merge threshold,
//! freshness window, subscriber queue size and replay clock policy.
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("bus.toml")).unwrap();
//! println!("merge threshold: {}s", config.merge_threshold_secs);
//! ```

mod parser;
mod validator;

pub use contracts::BusConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;
use tracing::debug;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<BusConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        let config = Self::load_from_str(&content, format)?;
        debug!(
            path = %path.display(),
            priorities = config.priorities.len(),
            "loaded bus config"
        );
        Ok(config)
    }

    /// Load configuration from string
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<BusConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Serialize BusConfig to TOML string
    pub fn to_toml(config: &BusConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize BusConfig to JSON string
    pub fn to_json(config: &BusConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        ConfigFormat::from_extension(ext).ok_or_else(|| ContractError::UnsupportedFormat {
            extension: ext.to_string(),
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ClockMode;
    use std::io::Write;

    const SAMPLE_TOML: &str = r#"
merge_threshold_secs = 2.0
freshness_max_age_secs = 10.0
default_subscriber_queue = 64

[replay]
clock_mode = "follow_samples"

[priorities]
"NMEA2000" = 3
"Internal" = 1
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(SAMPLE_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.merge_threshold_secs, 2.0);
        assert_eq!(config.default_subscriber_queue, 64);
        assert_eq!(config.replay.clock_mode, ClockMode::FollowSamples);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(SAMPLE_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let again = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(SAMPLE_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = "merge_threshold_secs = -1.0\n";
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("merge_threshold_secs"));

        let result = ConfigLoader::load_from_str("merge_threshold_secs = 1e300\n", ConfigFormat::Toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE_TOML.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.priorities.get("NMEA2000"), Some(&3));
    }

    #[test]
    fn test_load_from_path_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedFormat { ref extension } if extension == "yaml"));
    }

    #[test]
    fn test_load_from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_from_path(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ContractError::Io(_)));
    }
}
