use serde::Deserialize;
use std::path::PathBuf;

use super::ConfigError;
use crate::core::hardware::ProbeKind;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8880
///   api_key: "change-me"
///   cors_allowed_origins: "*"
///   rate_limit:
///     requests_per_second: 60
///     burst_size: 10
///
/// inference:
///   url: "http://127.0.0.1:5006"
///   model: "orpheus"
///   timeout_seconds: 30
///   temperature: 0.6
///   top_p: 0.9
///   max_tokens: 8192
///
/// codec:
///   url: "http://127.0.0.1:5007"
///   sample_rate: 24000
///   timeout_seconds: 30
///
/// synthesis:
///   max_chunk_chars: 1000
///   crossfade_ms: 50
///   default_voice: "tara"
///   voices: ["tara", "leah", "leo"]
///
/// hardware:
///   probe: "auto"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub inference: Option<InferenceYaml>,
    pub codec: Option<CodecYaml>,
    pub synthesis: Option<SynthesisYaml>,
    pub hardware: Option<HardwareYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit: Option<RateLimitYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitYaml {
    pub requests_per_second: Option<u32>,
    pub burst_size: Option<u32>,
}

/// Inference service configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InferenceYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Accepted by the parser only so that an override can be reported
    pub repetition_penalty: Option<f32>,
}

/// Codec service configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CodecYaml {
    pub url: Option<String>,
    pub sample_rate: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Chunking and stitching configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SynthesisYaml {
    pub max_chunk_chars: Option<usize>,
    pub crossfade_ms: Option<u32>,
    pub default_voice: Option<String>,
    pub voices: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HardwareYaml {
    pub probe: Option<ProbeKind>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
