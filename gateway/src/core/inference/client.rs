use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::config::{DEFAULT_CONNECT_TIMEOUT_SECS, InferenceConfig};
use super::messages::{CompletionChunk, CompletionRequest, ErrorResponse};
use super::{InferenceError, InferenceResult, TokenRequest, TokenSource, TokenStream};
use crate::core::tokens::{CODEBOOK_SIZE, TOKENS_PER_FRAME, Token};

/// Offset between the raw marker number and the codebook id.
const TOKEN_ID_OFFSET: i64 = 10;

/// Longest incomplete marker kept between events before it is discarded.
const MAX_CARRY_LEN: usize = 64;

/// Longest unterminated event line buffered before the stream is rejected.
const MAX_SSE_LINE_BYTES: usize = 1 << 20;

static TOKEN_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<custom_token_(\d+)>").expect("token marker pattern is valid"));

/// Build the model prompt for one chunk.
pub fn format_prompt(voice: &str, text: &str) -> String {
    format!("<|audio|>{voice}: {text}<|eot_id|>")
}

// =============================================================================
// Token parsing
// =============================================================================

/// Extracts codec tokens from streamed completion text.
///
/// Markers may be split across events, so an incomplete trailing marker is carried
/// over to the next call. The codebook id depends on the position of the token
/// within its frame.
#[derive(Debug, Default)]
pub struct TokenParser {
    carry: String,
    position: usize,
}

impl TokenParser {
    /// Number of tokens produced so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn feed(&mut self, text: &str) -> InferenceResult<Vec<Token>> {
        self.carry.push_str(text);

        let mut tokens = Vec::new();
        let mut consumed = 0;
        for caps in TOKEN_MARKER.captures_iter(&self.carry) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let raw: i64 = number.as_str().parse().map_err(|_| {
                InferenceError::Protocol(format!("token marker out of range: {}", whole.as_str()))
            })?;
            let slot = (self.position % TOKENS_PER_FRAME) as i64;
            let id = raw - TOKEN_ID_OFFSET - slot * i64::from(CODEBOOK_SIZE);
            let token = Token::from_signed(id).ok_or_else(|| {
                InferenceError::Protocol(format!(
                    "token id {id} at position {} outside [0, {CODEBOOK_SIZE})",
                    self.position
                ))
            })?;
            tokens.push(token);
            self.position += 1;
            consumed = whole.end();
        }

        let rest = &self.carry[consumed..];
        let keep_from = match rest.rfind('<') {
            Some(start) if !rest[start..].contains('>') && rest.len() - start <= MAX_CARRY_LEN => {
                Some(consumed + start)
            }
            _ => None,
        };
        self.carry = match keep_from {
            Some(start) => self.carry[start..].to_string(),
            None => String::new(),
        };

        Ok(tokens)
    }
}

// =============================================================================
// Server-sent events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Data(String),
    Done,
}

/// Line-oriented decoder for `data:` events
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> InferenceResult<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let line = &self.buffer[consumed..consumed + offset];
            consumed += offset + 1;

            let line = std::str::from_utf8(line)
                .map_err(|e| InferenceError::Protocol(format!("invalid UTF-8 in stream: {e}")))?;
            let line = line.trim_end_matches('\r');

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !payload.is_empty() {
                events.push(SseEvent::Data(payload.to_string()));
            }
        }
        self.buffer.drain(..consumed);

        if self.buffer.len() > MAX_SSE_LINE_BYTES {
            return Err(InferenceError::Protocol(format!(
                "event line exceeds {MAX_SSE_LINE_BYTES} bytes without a newline"
            )));
        }
        Ok(events)
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for an OpenAI-compatible streaming completions endpoint.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: Client,
    config: InferenceConfig,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> InferenceResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("tokenwave-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InferenceError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

fn classify_transport_error(err: reqwest::Error, timeout_ms: u64) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(timeout_ms)
    } else {
        InferenceError::Network(err.to_string())
    }
}

#[async_trait]
impl TokenSource for InferenceClient {
    async fn stream_tokens(&self, request: TokenRequest) -> InferenceResult<TokenStream> {
        let chunk_index = request.chunk_index;
        let timeout = self.config.timeout;
        let timeout_ms = self.timeout_ms();

        let prompt = format_prompt(&request.voice, &request.text);
        let body = CompletionRequest::new(&self.config.model, prompt, &request.params);

        info!(
            chunk_index,
            chars = request.text.chars().count(),
            voice = %request.voice,
            "Requesting token stream"
        );

        let response = tokio::time::timeout(
            timeout,
            self.http
                .post(self.config.completions_url())
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| InferenceError::Timeout(timeout_ms))?
        .map_err(|e| classify_transport_error(e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let text = tokio::time::timeout(timeout, response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message().to_string())
                .unwrap_or(text);
            warn!(chunk_index, status = status.as_u16(), "Inference service rejected request");
            return Err(InferenceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let stream = async_stream::try_stream! {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut parser = TokenParser::default();

            'read: loop {
                let next = tokio::time::timeout(timeout, body.next())
                    .await
                    .map_err(|_| InferenceError::Timeout(timeout_ms))?;
                let Some(bytes) = next else {
                    break;
                };
                let bytes = bytes.map_err(|e| classify_transport_error(e, timeout_ms))?;

                for event in decoder.push(&bytes)? {
                    match event {
                        SseEvent::Done => break 'read,
                        SseEvent::Data(payload) => {
                            let chunk: CompletionChunk = serde_json::from_str(&payload).map_err(|e| {
                                InferenceError::Protocol(format!("invalid event payload: {e}"))
                            })?;
                            for token in parser.feed(&chunk.text())? {
                                yield token;
                            }
                        }
                    }
                }
            }

            debug!(chunk_index, tokens = parser.position(), "Token stream finished");
        };

        Ok(Box::pin(stream))
    }
}
