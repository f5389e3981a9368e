//! Wire types for the OpenAI-compatible completions API.

use serde::{Deserialize, Serialize};

use super::config::{REPETITION_PENALTY, SamplingParams};

/// Streaming completion request body.
///
/// The repetition penalty is sent under both names understood by common
/// completion servers.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub repetition_penalty: f32,
    pub stream: bool,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(model: &'a str, prompt: String, params: &SamplingParams) -> Self {
        Self {
            model,
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            repeat_penalty: REPETITION_PENALTY,
            repetition_penalty: REPETITION_PENALTY,
            stream: true,
        }
    }
}

/// One `data:` event of the streamed response.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: String,
}

impl CompletionChunk {
    /// Concatenated text of all choices
    pub fn text(&self) -> String {
        self.choices.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Error payload some servers return with a non-success status.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message { message: String },
    Text(String),
}

impl ErrorDetail {
    pub fn message(&self) -> &str {
        match self {
            ErrorDetail::Message { message } => message,
            ErrorDetail::Text(text) => text,
        }
    }
}
