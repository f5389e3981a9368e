//! Neural audio codec boundary.
//!
//! The codec turns one decode window into PCM. Only its contract is modelled here:
//! a frame-aligned window of token ids in, 16-bit mono samples out.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::tokens::Window;

/// Default codec service URL
pub const DEFAULT_CODEC_URL: &str = "http://127.0.0.1:5007";

/// Output sample rate of the codec
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

pub const DEFAULT_CODEC_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("codec service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("codec returned malformed audio: {0}")]
    InvalidAudio(String),

    #[error("codec request failed: {0}")]
    Network(String),

    #[error("codec request timed out")]
    Timeout,

    #[error("codec configuration error: {0}")]
    Configuration(String),

    #[error("codec panicked while decoding")]
    Panicked,
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Decodes windows into PCM samples.
///
/// Implementations must be safe to call concurrently; the synthesizer runs up to
/// `worker_count` decodes at once.
#[async_trait]
pub trait AudioCodec: Send + Sync {
    async fn decode(&self, window: &Window) -> CodecResult<Vec<i16>>;

    fn sample_rate(&self) -> u32;
}

#[derive(Debug, Serialize)]
struct DecodeRequest {
    codes: Vec<u32>,
}

/// Settings for [`RemoteCodec`]
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    pub url: String,
    pub sample_rate: u32,
    pub timeout: Duration,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CODEC_URL.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            timeout: Duration::from_secs(DEFAULT_CODEC_TIMEOUT_SECS),
        }
    }
}

/// Codec served over HTTP: `POST {url}/decode` with `{"codes": [...]}`, answered
/// with raw little-endian 16-bit PCM.
#[derive(Debug, Clone)]
pub struct RemoteCodec {
    http: Client,
    decode_url: String,
    sample_rate: u32,
}

impl RemoteCodec {
    pub fn new(config: CodecConfig) -> CodecResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("tokenwave-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CodecError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            decode_url: format!("{}/decode", config.url.trim_end_matches('/')),
            sample_rate: config.sample_rate,
        })
    }
}

/// Interpret a body as little-endian 16-bit samples.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> CodecResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::InvalidAudio(format!(
            "odd PCM byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[async_trait]
impl AudioCodec for RemoteCodec {
    async fn decode(&self, window: &Window) -> CodecResult<Vec<i16>> {
        let request = DecodeRequest {
            codes: window.codes(),
        };

        let response = self
            .http
            .post(&self.decode_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CodecError::Timeout
                } else {
                    CodecError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body: Bytes = response
            .bytes()
            .await
            .map_err(|e| CodecError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(CodecError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let samples = pcm_from_le_bytes(&body)?;
        debug!(
            window_index = window.index(),
            frames = window.frame_count(),
            samples = samples.len(),
            "Window decoded"
        );
        Ok(samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
