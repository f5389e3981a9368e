//! Configuration types for the token inference service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Default OpenAI-compatible completions server.
pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:5006";

/// Default model name sent with every completion request.
pub const DEFAULT_MODEL: &str = "orpheus";

/// Default deadline for the request and each subsequent read.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connect timeout for the HTTP client.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Fixed repetition penalty. Stable output depends on this value; it cannot be
/// overridden in configuration or per request.
pub const REPETITION_PENALTY: f32 = 1.1;

/// Voices the model was trained with.
pub const DEFAULT_VOICES: &[&str] = &["tara", "leah", "jess", "leo", "dan", "mia", "zac", "zoe"];

pub const DEFAULT_VOICE: &str = "tara";

// =============================================================================
// Sampling
// =============================================================================

/// Per-request sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl SamplingParams {
    /// Apply optional per-request overrides.
    pub fn with_overrides(
        self,
        temperature: Option<f32>,
        top_p: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            temperature: temperature.unwrap_or(self.temperature),
            top_p: top_p.unwrap_or(self.top_p),
            max_tokens: max_tokens.unwrap_or(self.max_tokens),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(format!("top_p must be in (0.0, 1.0], got {}", self.top_p));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Client configuration
// =============================================================================

/// Connection settings for [`super::InferenceClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Base URL, without the `/v1/completions` suffix
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl InferenceConfig {
    pub fn completions_url(&self) -> String {
        format!("{}/v1/completions", self.url.trim_end_matches('/'))
    }
}
