//! Configuration validation logic.

use url::Url;

use super::{ConfigError, ServerConfig};
use crate::core::inference::SamplingParams;

pub(crate) const MIN_CHUNK_CHARS: usize = 50;
pub(crate) const MAX_CROSSFADE_MS: u32 = 1000;

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

pub(crate) fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| invalid(key, format!("'{value}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(key, format!("unsupported scheme '{other}'"))),
    }
}

pub(crate) fn validate_sampling(params: &SamplingParams) -> Result<(), ConfigError> {
    params.validate().map_err(ConfigError::Validation)
}

pub(crate) fn validate_synthesis(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.max_chunk_chars < MIN_CHUNK_CHARS {
        return Err(invalid(
            "max_chunk_chars",
            format!("must be at least {MIN_CHUNK_CHARS}, got {}", config.max_chunk_chars),
        ));
    }
    if config.crossfade_ms > MAX_CROSSFADE_MS {
        return Err(invalid(
            "crossfade_ms",
            format!("must be at most {MAX_CROSSFADE_MS}, got {}", config.crossfade_ms),
        ));
    }
    if config.sample_rate == 0 {
        return Err(invalid("sample_rate", "must be greater than 0"));
    }
    if config.voices.is_empty() {
        return Err(invalid("voices", "at least one voice is required"));
    }
    if !config.voices.contains(&config.default_voice) {
        return Err(invalid(
            "default_voice",
            format!("'{}' is not in the voice list", config.default_voice),
        ));
    }
    Ok(())
}

pub(crate) fn validate_timeouts(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.inference_timeout_seconds == 0 {
        return Err(invalid("inference_timeout_seconds", "must be greater than 0"));
    }
    if config.codec_timeout_seconds == 0 {
        return Err(invalid("codec_timeout_seconds", "must be greater than 0"));
    }
    Ok(())
}

/// Run every check against a merged configuration
pub(crate) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_url("inference_url", &config.inference_url)?;
    validate_url("codec_url", &config.codec_url)?;
    validate_sampling(&config.sampling())?;
    validate_synthesis(config)?;
    validate_timeouts(config)?;
    Ok(())
}
