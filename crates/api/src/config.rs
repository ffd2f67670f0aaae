//! Service configuration

use inference_engine::{SessionOptions, DEFAULT_THRESHOLD, DEFAULT_WARMUP_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use upload::DEFAULT_MAX_UPLOAD_BYTES;

/// Environment variable naming an alternate config file
pub const CONFIG_PATH_ENV: &str = "IMAGE_DETECTOR_CONFIG";

/// Prefix for per-key environment overrides, e.g. `IMAGE_DETECTOR__MODEL_PATH`
pub const ENV_PREFIX: &str = "IMAGE_DETECTOR";

const DEFAULT_CONFIG_FILE: &str = "image-detector.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address
    pub bind_addr: String,
    /// ONNX model artifact, provisioned before startup
    pub model_path: PathBuf,
    /// Image run through the model at startup
    pub warmup_fixture: PathBuf,
    /// Number of warmup runs
    pub warmup_iterations: usize,
    /// Upload size ceiling (bytes)
    pub max_upload_bytes: usize,
    /// AI probability cutoff (exclusive)
    pub decision_threshold: f32,
    /// Overall per-request deadline (ms)
    pub request_timeout_ms: u64,
    /// Where uploads are materialized
    pub temp_dir: PathBuf,
    /// Max tracing level
    pub log_level: String,
    pub log_format: LogFormat,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Inference session tuning
    pub session: SessionOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            model_path: PathBuf::from("models/model.onnx"),
            warmup_fixture: PathBuf::from("static/images/about.jpeg"),
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            decision_threshold: DEFAULT_THRESHOLD,
            request_timeout_ms: 30_000,
            temp_dir: std::env::temp_dir().join("image-detector"),
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            metrics_enabled: true,
            session: SessionOptions::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from `image-detector.toml` (or `$IMAGE_DETECTOR_CONFIG`) and
    /// `IMAGE_DETECTOR__*` environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load from a specific file (optional) plus environment overrides
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(ConfigError::Invalid(format!(
                "decision_threshold {} outside [0, 1]",
                self.decision_threshold
            )));
        }
        if self.warmup_iterations == 0 {
            return Err(ConfigError::Invalid("warmup_iterations must be > 0".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.session.pool_size == 0 {
            return Err(ConfigError::Invalid("session.pool_size must be > 0".into()));
        }
        Ok(())
    }

    /// Per-request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.warmup_iterations, 3);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.decision_threshold, 0.5);
        assert_eq!(config.model_path, PathBuf::from("models/model.onnx"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let config = ServiceConfig {
            decision_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ServiceConfig {
            warmup_iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.toml");
        std::fs::write(
            &path,
            r#"
model_path = "/srv/models/detector.onnx"
warmup_iterations = 5
log_format = "json"

[session]
pool_size = 2
"#,
        )
        .unwrap();

        let config = ServiceConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.model_path, PathBuf::from("/srv/models/detector.onnx"));
        assert_eq!(config.warmup_iterations, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.session.pool_size, 2);
        assert!(config.session.memory_pattern);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }
}
