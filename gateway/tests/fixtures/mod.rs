//! Test Fixtures Module
//!
//! Scripted upstreams for pipeline and HTTP tests:
//! - `ScriptedTokenSource` plays back per-chunk token streams and failures
//! - `FakeCodec` decodes windows into deterministic PCM with uneven latency

// Not every test binary uses every fixture
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use tokenwave_gateway::core::codec::{AudioCodec, CodecError, CodecResult};
use tokenwave_gateway::core::hardware::{AcceleratorInfo, HardwareProfile};
use tokenwave_gateway::core::inference::{
    InferenceError, InferenceResult, TokenRequest, TokenSource, TokenStream,
};
use tokenwave_gateway::core::pipeline::{PipelineConfig, SpeechPipeline};
use tokenwave_gateway::core::stitcher::SegmentStitcher;
use tokenwave_gateway::core::tokens::{
    FRAMES_PER_WINDOW, Frame, TOKENS_PER_FRAME, TOKENS_PER_WINDOW, Token, Window,
};

/// Sample rate reported by [`FakeCodec`]
pub const FAKE_SAMPLE_RATE: u32 = 1_000;

/// Samples produced per frame by [`FakeCodec`]
pub const SAMPLES_PER_FRAME: usize = 40;

// =============================================================================
// Token source
// =============================================================================

/// What the scripted source does for one chunk
#[derive(Debug, Clone)]
pub enum ChunkScript {
    /// Stream this many tokens, then end
    Tokens(usize),
    /// Fail when the stream is opened
    FailOpen(InferenceError),
    /// Stream this many tokens, then yield the error
    FailAfter(usize, InferenceError),
}

/// Token source that replays scripted behaviour per chunk index and records every
/// request it receives.
pub struct ScriptedTokenSource {
    scripts: HashMap<usize, ChunkScript>,
    default_tokens: usize,
    token_delay: Duration,
    requests: Mutex<Vec<TokenRequest>>,
}

impl ScriptedTokenSource {
    /// Every chunk streams `default_tokens` tokens unless scripted otherwise
    pub fn new(default_tokens: usize) -> Self {
        Self {
            scripts: HashMap::new(),
            default_tokens,
            token_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(mut self, chunk_index: usize, script: ChunkScript) -> Self {
        self.scripts.insert(chunk_index, script);
        self
    }

    /// Sleep between tokens, so a stream is still running when a test acts on it
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<TokenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_chunks(&self) -> Vec<usize> {
        self.requests().iter().map(|r| r.chunk_index).collect()
    }
}

/// Deterministic valid token for position `i` of chunk `chunk_index`
pub fn scripted_token(chunk_index: usize, i: usize) -> Token {
    Token::new(((chunk_index * 977 + i * 31) % 4096) as u32).unwrap()
}

#[async_trait]
impl TokenSource for ScriptedTokenSource {
    async fn stream_tokens(&self, request: TokenRequest) -> InferenceResult<TokenStream> {
        let chunk_index = request.chunk_index;
        self.requests.lock().unwrap().push(request);

        let script = self
            .scripts
            .get(&chunk_index)
            .cloned()
            .unwrap_or(ChunkScript::Tokens(self.default_tokens));

        let (count, trailing_error) = match script {
            ChunkScript::Tokens(count) => (count, None),
            ChunkScript::FailOpen(err) => return Err(err),
            ChunkScript::FailAfter(count, err) => (count, Some(err)),
        };

        let delay = self.token_delay;
        let tokens = futures::stream::iter(0..count).then(move |i| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Token, InferenceError>(scripted_token(chunk_index, i))
        });
        let tail = futures::stream::iter(trailing_error.map(Err::<Token, InferenceError>));

        Ok(Box::pin(tokens.chain(tail)))
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Codec producing a deterministic signal per window. Even windows take longer
/// than odd ones so completions arrive out of order.
pub struct FakeCodec {
    delay: Duration,
    fail_window: Option<usize>,
    decodes: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(4))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail_window: None,
            decodes: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Fail every decode of the window with this index
    pub fn failing_at(mut self, window_index: usize) -> Self {
        self.fail_window = Some(window_index);
        self
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// Most decodes ever running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for FakeCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples [`FakeCodec`] produces for `window`
pub fn expected_samples(window: &Window) -> Vec<i16> {
    let seed: u32 = window.codes().iter().sum();
    (0..window.frame_count() * SAMPLES_PER_FRAME)
        .map(|i| ((seed as usize + i * 13) % 2000) as i16 - 1000)
        .collect()
}

#[async_trait]
impl AudioCodec for FakeCodec {
    async fn decode(&self, window: &Window) -> CodecResult<Vec<i16>> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let factor = if window.index() % 2 == 0 { 3 } else { 1 };
        tokio::time::sleep(self.delay * factor).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_window == Some(window.index()) {
            return Err(CodecError::InvalidAudio("corrupt window".to_string()));
        }
        Ok(expected_samples(window))
    }

    fn sample_rate(&self) -> u32 {
        FAKE_SAMPLE_RATE
    }
}

// =============================================================================
// Pipeline helpers
// =============================================================================

/// Tokens for exactly `windows` full decode windows
pub fn tokens_for_windows(windows: usize) -> usize {
    windows * TOKENS_PER_WINDOW
}

/// Audio the pipeline should produce for one chunk that streamed `token_count`
/// scripted tokens
pub fn expected_chunk_audio(
    chunk_index: usize,
    token_count: usize,
    stitcher: &SegmentStitcher,
) -> Vec<i16> {
    let tokens: Vec<Token> = (0..token_count)
        .map(|i| scripted_token(chunk_index, i))
        .collect();
    let frames: Vec<Frame> = tokens
        .chunks_exact(TOKENS_PER_FRAME)
        .map(|frame| Frame::from_slice(frame).unwrap())
        .collect();
    let decoded: Vec<Vec<i16>> = frames
        .chunks(FRAMES_PER_WINDOW)
        .enumerate()
        .map(|(index, frames)| expected_samples(&Window::new(index, frames.to_vec()).unwrap()))
        .collect();
    stitcher.join_chunks(&decoded)
}

/// `count` sentences of 37 characters each
pub fn sentences(count: usize) -> String {
    (0..count)
        .map(|i| format!("This is test sentence number {i:02} here."))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pipeline config that puts each sentence from [`sentences`] in its own chunk
pub fn one_sentence_per_chunk() -> PipelineConfig {
    PipelineConfig {
        max_chunk_chars: 60,
        crossfade_ms: 10,
        ..PipelineConfig::default()
    }
}

/// Standard-tier profile with two decode workers
pub fn standard_profile() -> HardwareProfile {
    HardwareProfile::from_accelerator(Some(AcceleratorInfo {
        name: "Test GPU".to_string(),
        memory_gb: 8.0,
        compute_capability: Some(7.5),
    }))
}

pub fn pipeline(
    config: PipelineConfig,
    profile: HardwareProfile,
    source: Arc<ScriptedTokenSource>,
    codec: Arc<FakeCodec>,
) -> SpeechPipeline {
    SpeechPipeline::new(config, profile, source, codec)
}
