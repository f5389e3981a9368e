//! Configuration module for the tokenwave gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use tokenwave_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::chunker::DEFAULT_MAX_CHUNK_CHARS;
use crate::core::codec::{
    CodecConfig, DEFAULT_CODEC_TIMEOUT_SECS, DEFAULT_CODEC_URL, DEFAULT_SAMPLE_RATE,
};
use crate::core::hardware::ProbeKind;
use crate::core::inference::{
    DEFAULT_INFERENCE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    DEFAULT_TIMEOUT_SECS, DEFAULT_TOP_P, DEFAULT_VOICE, DEFAULT_VOICES, InferenceConfig,
    SamplingParams,
};
use crate::core::pipeline::PipelineConfig;
use crate::core::stitcher::DEFAULT_CROSSFADE_MS;

pub use yaml::YamlConfig;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("repetition_penalty is fixed at 1.1 and cannot be overridden")]
    RepetitionPenaltyOverride,

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway, including:
/// - Server settings (host, port, optional API key)
/// - Inference service connection and sampling defaults
/// - Codec service connection
/// - Chunking and stitching settings
/// - Security settings (CORS, rate limiting)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Bearer key required on API routes when set
    pub api_key: Option<String>,

    // Inference service
    pub inference_url: String,
    pub inference_model: String,
    pub inference_timeout_seconds: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,

    // Codec service
    pub codec_url: String,
    pub sample_rate: u32,
    pub codec_timeout_seconds: u64,

    // Synthesis
    pub max_chunk_chars: usize,
    pub crossfade_ms: u32,
    pub default_voice: String,
    pub voices: Vec<String>,

    // Hardware
    pub hardware_probe: ProbeKind,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8880,
            api_key: None,
            inference_url: DEFAULT_INFERENCE_URL.to_string(),
            inference_model: DEFAULT_MODEL.to_string(),
            inference_timeout_seconds: DEFAULT_TIMEOUT_SECS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_MAX_TOKENS,
            codec_url: DEFAULT_CODEC_URL.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            codec_timeout_seconds: DEFAULT_CODEC_TIMEOUT_SECS,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            crossfade_ms: DEFAULT_CROSSFADE_MS,
            default_voice: DEFAULT_VOICE.to_string(),
            voices: DEFAULT_VOICES.iter().map(|v| v.to_string()).collect(),
            hardware_probe: ProbeKind::Auto,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The `.env` file is loaded in `main` before this is called, so its values are
    /// visible here as ordinary environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Either source tries to override the repetition penalty
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if bearer key authentication is enabled
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Default sampling parameters
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }

    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            url: self.inference_url.clone(),
            model: self.inference_model.clone(),
            timeout: Duration::from_secs(self.inference_timeout_seconds),
        }
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            url: self.codec_url.clone(),
            sample_rate: self.sample_rate,
            timeout: Duration::from_secs(self.codec_timeout_seconds),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_chunk_chars: self.max_chunk_chars,
            crossfade_ms: self.crossfade_ms,
            default_voice: self.default_voice.clone(),
            voices: self.voices.clone(),
            sampling: self.sampling(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const ENV_KEYS: &[&str] = &[
        "HOST",
        "PORT",
        "API_KEY",
        "INFERENCE_URL",
        "INFERENCE_MODEL",
        "INFERENCE_TIMEOUT_SECONDS",
        "TEMPERATURE",
        "TOP_P",
        "MAX_TOKENS",
        "REPETITION_PENALTY",
        "CODEC_URL",
        "SAMPLE_RATE",
        "CODEC_TIMEOUT_SECONDS",
        "MAX_CHUNK_CHARS",
        "CROSSFADE_MS",
        "DEFAULT_VOICE",
        "VOICES",
        "HARDWARE_PROBE",
        "CORS_ALLOWED_ORIGINS",
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        "RATE_LIMIT_BURST_SIZE",
    ];

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            for key in ENV_KEYS {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.address(), "0.0.0.0:8880");
        assert_eq!(config.max_chunk_chars, 1000);
        assert_eq!(config.crossfade_ms, 50);
        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.default_voice, "tara");
        assert_eq!(config.voices.len(), 8);
        assert!(!config.has_api_key());
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "9100");
            env::set_var("API_KEY", "k");
            env::set_var("VOICES", "leo, Tara");
            env::set_var("DEFAULT_VOICE", "Leo");
            env::set_var("HARDWARE_PROBE", "cpu");
            env::set_var("INFERENCE_TIMEOUT_SECONDS", "5");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 9100);
        assert!(config.has_api_key());
        assert_eq!(config.voices, vec!["leo", "tara"]);
        assert_eq!(config.default_voice, "leo");
        assert_eq!(config.hardware_probe, ProbeKind::Cpu);
        assert_eq!(config.inference_config().timeout, Duration::from_secs(5));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_repetition_penalty() {
        cleanup_env_vars();
        unsafe {
            env::set_var("REPETITION_PENALTY", "1.3");
        }

        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::RepetitionPenaltyOverride)
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PORT", "not-a-port");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
server:
  host: "127.0.0.1"
synthesis:
  max_chunk_chars: 500
"#,
        )
        .unwrap();

        unsafe {
            env::set_var("HOST", "10.0.0.1");
            env::set_var("MAX_CHUNK_CHARS", "800");
            env::set_var("CROSSFADE_MS", "20");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();
        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_chunk_chars, 500);
        // ENV value where YAML is silent
        assert_eq!(config.crossfade_ms, 20);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_repetition_penalty() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "inference:\n  repetition_penalty: 1.0\n").unwrap();

        assert!(matches!(
            ServerConfig::from_file(&config_path),
            Err(ConfigError::RepetitionPenaltyOverride)
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML"));

        cleanup_env_vars();
    }

    #[test]
    fn test_derived_configs() {
        let config = ServerConfig::default();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.max_chunk_chars, 1000);
        assert_eq!(pipeline.sampling, SamplingParams::default());
        assert_eq!(config.codec_config().sample_rate, 24_000);
        assert_eq!(config.inference_config().model, "orpheus");
    }
}
