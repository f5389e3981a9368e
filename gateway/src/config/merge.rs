//! Merging of YAML values over the environment-based configuration.

use super::env::load_from_env;
use super::yaml::YamlConfig;
use super::{ConfigError, ServerConfig};

/// Load environment configuration and apply YAML overrides on top.
pub(crate) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(api_key) = server.api_key {
            config.api_key = Some(api_key);
        }
        if let Some(origins) = server.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rate_limit) = server.rate_limit {
            if let Some(rps) = rate_limit.requests_per_second {
                config.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = rate_limit.burst_size {
                config.rate_limit_burst_size = burst;
            }
        }
    }

    if let Some(inference) = yaml.inference {
        if inference.repetition_penalty.is_some() {
            return Err(ConfigError::RepetitionPenaltyOverride);
        }
        if let Some(url) = inference.url {
            config.inference_url = url;
        }
        if let Some(model) = inference.model {
            config.inference_model = model;
        }
        if let Some(timeout) = inference.timeout_seconds {
            config.inference_timeout_seconds = timeout;
        }
        if let Some(temperature) = inference.temperature {
            config.temperature = temperature;
        }
        if let Some(top_p) = inference.top_p {
            config.top_p = top_p;
        }
        if let Some(max_tokens) = inference.max_tokens {
            config.max_tokens = max_tokens;
        }
    }

    if let Some(codec) = yaml.codec {
        if let Some(url) = codec.url {
            config.codec_url = url;
        }
        if let Some(sample_rate) = codec.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(timeout) = codec.timeout_seconds {
            config.codec_timeout_seconds = timeout;
        }
    }

    if let Some(synthesis) = yaml.synthesis {
        if let Some(max_chunk_chars) = synthesis.max_chunk_chars {
            config.max_chunk_chars = max_chunk_chars;
        }
        if let Some(crossfade_ms) = synthesis.crossfade_ms {
            config.crossfade_ms = crossfade_ms;
        }
        if let Some(voice) = synthesis.default_voice {
            config.default_voice = voice.trim().to_lowercase();
        }
        if let Some(voices) = synthesis.voices {
            config.voices = voices
                .into_iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect();
        }
    }

    if let Some(probe) = yaml.hardware.and_then(|h| h.probe) {
        config.hardware_probe = probe;
    }

    Ok(config)
}
