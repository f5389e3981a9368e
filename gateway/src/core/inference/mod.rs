//! Token stream client for the remote inference service.
//!
//! One chunk of text becomes one streaming completion request. The streamed text is
//! scanned for `<custom_token_N>` markers which are converted to codec token ids in
//! arrival order.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use tokenwave_gateway::core::inference::{InferenceClient, InferenceConfig, TokenRequest, TokenSource};
//!
//! let client = InferenceClient::new(InferenceConfig::default())?;
//! let mut tokens = client
//!     .stream_tokens(TokenRequest::new(0, "Hello there.", "tara", Default::default()))
//!     .await?;
//! while let Some(token) = tokens.next().await {
//!     println!("{}", token?);
//! }
//! ```

mod client;
mod config;
mod messages;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::core::tokens::Token;
use crate::errors::PipelineError;

pub use client::{InferenceClient, TokenParser, format_prompt};
pub use config::{
    DEFAULT_INFERENCE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    DEFAULT_TIMEOUT_SECS, DEFAULT_TOP_P, DEFAULT_VOICE, DEFAULT_VOICES, InferenceConfig,
    REPETITION_PENALTY, SamplingParams,
};
pub use messages::{CompletionChunk, CompletionRequest};

/// Errors raised while requesting or consuming a token stream
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(String),
}

pub type InferenceResult<T> = Result<T, InferenceError>;

impl InferenceError {
    /// Scope the error to the chunk whose stream produced it
    pub fn into_pipeline_error(self, chunk_index: usize) -> PipelineError {
        match self {
            InferenceError::Timeout(timeout_ms) => PipelineError::UpstreamTimeout {
                chunk_index,
                timeout_ms,
            },
            other => PipelineError::UpstreamProtocol {
                chunk_index,
                message: other.to_string(),
            },
        }
    }
}

/// Lazy, ordered, finite stream of tokens for one chunk
pub type TokenStream = Pin<Box<dyn Stream<Item = InferenceResult<Token>> + Send>>;

/// Everything needed to request the token stream of one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub chunk_index: usize,
    pub text: String,
    pub voice: String,
    pub params: SamplingParams,
}

impl TokenRequest {
    pub fn new(
        chunk_index: usize,
        text: impl Into<String>,
        voice: impl Into<String>,
        params: SamplingParams,
    ) -> Self {
        Self {
            chunk_index,
            text: text.into(),
            voice: voice.into(),
            params,
        }
    }
}

/// Source of per-chunk token streams.
///
/// A stream is restartable per chunk by issuing a new request, never mid-chunk.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Open the token stream for one chunk.
    ///
    /// Errors returned here, or yielded by the stream, end the chunk.
    async fn stream_tokens(&self, request: TokenRequest) -> InferenceResult<TokenStream>;
}
