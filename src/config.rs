//! Configuration for the sobriety pipeline.

use crate::core::features::FeatureNaming;
use crate::core::labeling::DEFAULT_LABEL_THRESHOLD;
use crate::core::windowing::DEFAULT_WINDOW_SIZE_MS;
use crate::source::csv::{SampleSourceOptions, TimeUnit};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the model endpoint URL.
pub const ENDPOINT_URL_ENV: &str = "AML_ENDPOINT_URL";
/// Environment variable holding the model endpoint key.
pub const PRIMARY_KEY_ENV: &str = "AML_PRIMARY_KEY";

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Duration of each window
    #[serde(with = "duration_ms_serde")]
    pub window_size: Duration,

    /// Reference values strictly above this are labeled 1
    pub label_threshold: f64,

    /// Unit of reference file timestamps
    pub reference_time_unit: TimeUnit,

    /// Discard raw rows stamped exactly 0
    pub drop_zero_timestamps: bool,

    /// Column naming for exported feature tables
    pub feature_naming: FeatureNaming,

    /// Process devices on separate threads in the batch path
    pub parallel_devices: bool,

    /// Path for exported feature tables
    pub export_path: PathBuf,

    /// Path for run statistics
    pub data_path: PathBuf,

    /// Model endpoint settings
    pub inference: InferenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sobriety-pipeline");

        Self {
            window_size: Duration::from_millis(DEFAULT_WINDOW_SIZE_MS),
            label_threshold: DEFAULT_LABEL_THRESHOLD,
            reference_time_unit: TimeUnit::Seconds,
            drop_zero_timestamps: true,
            feature_naming: FeatureNaming::Normalized,
            parallel_devices: true,
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            inference: InferenceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            Self::from_json(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from JSON.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sobriety-pipeline")
            .join("config.json")
    }

    /// Path of the persisted run statistics.
    pub fn run_stats_path(&self) -> PathBuf {
        self.data_path.join("run_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size_ms() == 0 {
            return Err(ConfigError::Invalid(
                "window_size must be at least 1 ms".to_string(),
            ));
        }
        if !self.label_threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "label_threshold must be finite, got {}",
                self.label_threshold
            )));
        }
        Ok(())
    }

    /// Window size in whole milliseconds.
    pub fn window_size_ms(&self) -> u64 {
        u64::try_from(self.window_size.as_millis()).unwrap_or(u64::MAX)
    }

    /// Options for reading raw sample rows.
    pub fn source_options(&self) -> SampleSourceOptions {
        SampleSourceOptions {
            drop_zero_timestamps: self.drop_zero_timestamps,
        }
    }
}

/// Connection settings for the external model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Scoring URL; empty when not configured
    pub endpoint_url: String,
    /// Bearer key sent with every request
    pub primary_key: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            primary_key: String::new(),
            timeout_secs: 10,
        }
    }
}

impl InferenceConfig {
    /// Create a new endpoint configuration.
    pub fn new(endpoint_url: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            primary_key: primary_key.into(),
            ..Self::default()
        }
    }

    /// Read endpoint settings from `AML_ENDPOINT_URL` and `AML_PRIMARY_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint_url = std::env::var(ENDPOINT_URL_ENV)
            .map_err(|_| ConfigError::Invalid(format!("{ENDPOINT_URL_ENV} is not set")))?;
        let primary_key = std::env::var(PRIMARY_KEY_ENV).unwrap_or_default();
        Ok(Self::new(endpoint_url.trim(), primary_key.trim()))
    }

    /// Whether an endpoint URL is present.
    pub fn is_configured(&self) -> bool {
        !self.endpoint_url.trim().is_empty()
    }

    /// Use these settings, or fall back to the environment when they are empty.
    pub fn or_from_env(&self) -> Result<Self, ConfigError> {
        if self.is_configured() {
            Ok(self.clone())
        } else {
            Self::from_env()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as milliseconds.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window_size, Duration::from_secs(10));
        assert_eq!(config.window_size_ms(), 10_000);
        assert_eq!(config.label_threshold, 0.08);
        assert_eq!(config.reference_time_unit, TimeUnit::Seconds);
        assert!(config.drop_zero_timestamps);
        assert_eq!(config.feature_naming, FeatureNaming::Normalized);
        assert!(!config.inference.is_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_size_serialized_as_millis() {
        let config = Config {
            window_size: Duration::from_millis(2500),
            ..Config::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["window_size"], 2500);
        assert_eq!(json["reference_time_unit"], "seconds");
        assert_eq!(json["feature_naming"], "normalized");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            Config::from_json(r#"{"window_size": 5000, "feature_naming": "legacy"}"#).unwrap();
        assert_eq!(config.window_size_ms(), 5000);
        assert_eq!(config.feature_naming, FeatureNaming::Legacy);
        assert_eq!(config.label_threshold, DEFAULT_LABEL_THRESHOLD);
        assert_eq!(config.inference.timeout_secs, 10);
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = Config::from_json(r#"{"window_size": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let config = Config {
            label_threshold: f64::NAN,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = Config::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_configured_inference_skips_env() {
        let inference = InferenceConfig::new("http://localhost:1/score", "key");
        let resolved = inference.or_from_env().unwrap();
        assert_eq!(resolved.endpoint_url, "http://localhost:1/score");
        assert_eq!(resolved.timeout(), Duration::from_secs(10));
    }
}
