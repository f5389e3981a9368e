//! Environment variable loading.

use std::env;
use std::str::FromStr;

use super::{ConfigError, ServerConfig};
use crate::core::hardware::ProbeKind;

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(default),
    }
}

/// Comma separated list, empty entries removed
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Build a configuration from environment variables on top of defaults.
pub(crate) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    if var("REPETITION_PENALTY").is_some() {
        return Err(ConfigError::RepetitionPenaltyOverride);
    }

    let defaults = ServerConfig::default();

    let hardware_probe = match var("HARDWARE_PROBE") {
        Some(raw) => ProbeKind::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: "HARDWARE_PROBE".to_string(),
            message: format!("expected 'auto' or 'cpu', got '{raw}'"),
        })?,
        None => defaults.hardware_probe,
    };

    Ok(ServerConfig {
        host: var("HOST").unwrap_or_else(|| defaults.host.clone()),
        port: parse_var("PORT", defaults.port)?,
        api_key: var("API_KEY"),

        inference_url: var("INFERENCE_URL").unwrap_or_else(|| defaults.inference_url.clone()),
        inference_model: var("INFERENCE_MODEL")
            .unwrap_or_else(|| defaults.inference_model.clone()),
        inference_timeout_seconds: parse_var(
            "INFERENCE_TIMEOUT_SECONDS",
            defaults.inference_timeout_seconds,
        )?,
        temperature: parse_var("TEMPERATURE", defaults.temperature)?,
        top_p: parse_var("TOP_P", defaults.top_p)?,
        max_tokens: parse_var("MAX_TOKENS", defaults.max_tokens)?,

        codec_url: var("CODEC_URL").unwrap_or_else(|| defaults.codec_url.clone()),
        sample_rate: parse_var("SAMPLE_RATE", defaults.sample_rate)?,
        codec_timeout_seconds: parse_var("CODEC_TIMEOUT_SECONDS", defaults.codec_timeout_seconds)?,

        max_chunk_chars: parse_var("MAX_CHUNK_CHARS", defaults.max_chunk_chars)?,
        crossfade_ms: parse_var("CROSSFADE_MS", defaults.crossfade_ms)?,
        default_voice: var("DEFAULT_VOICE")
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_else(|| defaults.default_voice.clone()),
        voices: var("VOICES")
            .map(|raw| parse_list(&raw))
            .unwrap_or_else(|| defaults.voices.clone()),

        hardware_probe,

        cors_allowed_origins: var("CORS_ALLOWED_ORIGINS"),
        rate_limit_requests_per_second: parse_var(
            "RATE_LIMIT_REQUESTS_PER_SECOND",
            defaults.rate_limit_requests_per_second,
        )?,
        rate_limit_burst_size: parse_var("RATE_LIMIT_BURST_SIZE", defaults.rate_limit_burst_size)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" Tara, leo ,,zac "), vec!["tara", "leo", "zac"]);
        assert!(parse_list(" , ").is_empty());
    }
}
