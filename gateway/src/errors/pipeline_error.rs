//! Pipeline error types
//!
//! Every error surfaced to callers of the synthesis pipeline carries the index of the
//! chunk it belongs to and the pipeline stage that produced it.

use std::fmt;
use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline stage in which an error or warning originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Chunking,
    Streaming,
    Windowing,
    Synthesis,
    Stitching,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Chunking => "chunking",
            Stage::Streaming => "streaming",
            Stage::Windowing => "windowing",
            Stage::Synthesis => "synthesis",
            Stage::Stitching => "stitching",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal pipeline errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The inference service did not answer within the configured deadline
    #[error("Chunk {chunk_index}: inference service timed out after {timeout_ms} ms")]
    UpstreamTimeout { chunk_index: usize, timeout_ms: u64 },

    /// The inference service returned an error status or a malformed payload
    #[error("Chunk {chunk_index}: inference service protocol error: {message}")]
    UpstreamProtocol { chunk_index: usize, message: String },

    /// The codec failed to decode a window
    #[error("Chunk {chunk_index}: decode of window {window_index} failed: {message}")]
    Synthesis {
        chunk_index: usize,
        window_index: usize,
        message: String,
    },

    /// The owning request was cancelled
    #[error("Chunk {chunk_index}: synthesis cancelled")]
    Cancelled { chunk_index: usize },

    /// The request itself is unusable (empty text, unknown voice)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Stage that produced the error
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::UpstreamTimeout { .. } | PipelineError::UpstreamProtocol { .. } => {
                Stage::Streaming
            }
            PipelineError::Synthesis { .. } | PipelineError::Cancelled { .. } => Stage::Synthesis,
            PipelineError::InvalidInput(_) => Stage::Chunking,
        }
    }

    /// Chunk the error is scoped to, if any
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            PipelineError::UpstreamTimeout { chunk_index, .. }
            | PipelineError::UpstreamProtocol { chunk_index, .. }
            | PipelineError::Synthesis { chunk_index, .. }
            | PipelineError::Cancelled { chunk_index } => Some(*chunk_index),
            PipelineError::InvalidInput(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

/// Non-fatal diagnostics attached to synthesis output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisWarning {
    /// No safe split point was found; the chunk ends at a hard split
    HardSplit { chunk_index: usize },
    /// Trailing tokens that did not fill a complete frame were dropped
    TokenAlignment {
        chunk_index: usize,
        dropped_tokens: usize,
    },
}

impl SynthesisWarning {
    pub fn stage(&self) -> Stage {
        match self {
            SynthesisWarning::HardSplit { .. } => Stage::Chunking,
            SynthesisWarning::TokenAlignment { .. } => Stage::Windowing,
        }
    }

    pub fn chunk_index(&self) -> usize {
        match self {
            SynthesisWarning::HardSplit { chunk_index }
            | SynthesisWarning::TokenAlignment { chunk_index, .. } => *chunk_index,
        }
    }
}

impl fmt::Display for SynthesisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisWarning::HardSplit { chunk_index } => {
                write!(f, "chunk {chunk_index}: no safe split point, hard split applied")
            }
            SynthesisWarning::TokenAlignment {
                chunk_index,
                dropped_tokens,
            } => write!(
                f,
                "chunk {chunk_index}: dropped {dropped_tokens} trailing token(s) outside a complete frame"
            ),
        }
    }
}
