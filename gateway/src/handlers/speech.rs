//! Speech synthesis endpoints.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::core::inference::SamplingParams;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use crate::utils::wav::{PcmFramer, encode_wav, pcm_to_bytes, streaming_wav_header};

/// Duration of each frame on the raw PCM stream
const PCM_FRAME_MS: u32 = 50;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// OpenAI-compatible speech request
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechRequest {
    /// Text to synthesize
    pub input: String,
    pub voice: Option<String>,
    /// Accepted for client compatibility; the configured model is always used
    pub model: Option<String>,
    pub response_format: Option<String>,
    pub speed: Option<f32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Present only so that an override can be rejected
    pub repetition_penalty: Option<serde_json::Value>,
}

/// Raw PCM stream request
#[derive(Debug, Clone, Deserialize)]
pub struct PcmStreamRequest {
    pub text: String,
    pub voice: Option<String>,
}

impl SpeechRequest {
    /// Validate request-level options and resolve sampling parameters
    fn sampling(&self, defaults: SamplingParams) -> AppResult<SamplingParams> {
        if self.repetition_penalty.is_some() {
            return Err(AppError::BadRequest(
                "repetition_penalty is fixed at 1.1 and cannot be overridden".to_string(),
            ));
        }
        if let Some(format) = self.response_format.as_deref() {
            if !format.eq_ignore_ascii_case("wav") {
                return Err(AppError::BadRequest(format!(
                    "unsupported response_format '{format}', only 'wav' is available"
                )));
            }
        }
        if let Some(speed) = self.speed.filter(|s| (s - 1.0).abs() > f32::EPSILON) {
            debug!(speed, "Playback speed is not adjustable, ignoring");
        }

        Ok(defaults.with_overrides(self.temperature, self.top_p, self.max_tokens))
    }
}

/// Synthesize the full input and return a WAV file
pub async fn create_speech(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeechRequest>,
) -> AppResult<Response> {
    let params = request.sampling(state.pipeline.default_sampling())?;
    let request_id = Uuid::new_v4();
    debug!(%request_id, chars = request.input.chars().count(), "Speech request received");

    let output = state
        .pipeline
        .synthesize(&request.input, request.voice.as_deref(), params)
        .await?;

    info!(
        %request_id,
        chunks = output.chunk_count,
        duration_secs = output.duration_secs(),
        warnings = output.warnings.len(),
        "Speech synthesized"
    );

    let wav = encode_wav(&output.samples, output.sample_rate)
        .map_err(|e| AppError::Internal(format!("Failed to encode WAV: {e}")))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"speech.wav\"".to_string()),
            (HeaderName::from_static("x-request-id"), request_id.to_string()),
        ],
        wav,
    )
        .into_response())
}

/// Stream a WAV of unknown length while chunks are synthesized.
///
/// Validation failures are returned as regular error responses. Once audio has
/// started, a pipeline failure ends the body with an error after the audio that was
/// already produced.
pub async fn stream_speech(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeechRequest>,
) -> AppResult<Response> {
    let params = request.sampling(state.pipeline.default_sampling())?;
    let request_id = Uuid::new_v4();

    let mut synthesis =
        state
            .pipeline
            .synthesize_stream(&request.input, request.voice.as_deref(), params)?;

    let header_bytes = streaming_wav_header(synthesis.sample_rate());
    let chunk_count = synthesis.chunk_count();

    let body = async_stream::stream! {
        yield Ok::<Bytes, std::io::Error>(header_bytes);

        while let Some(item) = synthesis.next().await {
            match item {
                Ok(chunk) => {
                    if !chunk.samples.is_empty() {
                        yield Ok(pcm_to_bytes(&chunk.samples));
                    }
                }
                Err(err) => {
                    error!(
                        %request_id,
                        chunk_index = ?err.chunk_index(),
                        stage = %err.stage(),
                        error = %err,
                        "Streaming synthesis failed"
                    );
                    yield Err(std::io::Error::other(err.to_string()));
                    return;
                }
            }
        }

        debug!(%request_id, chunks = chunk_count, "Speech stream finished");
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
            (HeaderName::from_static("x-request-id"), request_id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Stream headerless 16-bit mono PCM in fixed 50 ms frames.
///
/// The last frame is zero-padded to full length. Failures behave as in
/// [`stream_speech`].
pub async fn stream_pcm(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PcmStreamRequest>,
) -> AppResult<Response> {
    if request.text.is_empty() {
        return Err(AppError::BadRequest("Missing input text".to_string()));
    }
    let request_id = Uuid::new_v4();

    let mut synthesis = state.pipeline.synthesize_stream(
        &request.text,
        request.voice.as_deref(),
        state.pipeline.default_sampling(),
    )?;
    let mut framer = PcmFramer::new(synthesis.sample_rate(), PCM_FRAME_MS);
    debug!(
        %request_id,
        chars = request.text.chars().count(),
        frame_samples = framer.frame_samples(),
        "PCM stream request received"
    );

    let body = async_stream::stream! {
        let mut frames = 0usize;
        while let Some(item) = synthesis.next().await {
            match item {
                Ok(chunk) => {
                    for frame in framer.push(&chunk.samples) {
                        frames += 1;
                        yield Ok::<Bytes, std::io::Error>(frame);
                    }
                }
                Err(err) => {
                    error!(
                        %request_id,
                        chunk_index = ?err.chunk_index(),
                        stage = %err.stage(),
                        error = %err,
                        "PCM stream failed"
                    );
                    yield Err(std::io::Error::other(err.to_string()));
                    return;
                }
            }
        }
        if let Some(frame) = framer.finish() {
            frames += 1;
            yield Ok(frame);
        }

        debug!(%request_id, frames, "PCM stream finished");
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
            (HeaderName::from_static("x-request-id"), request_id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}
