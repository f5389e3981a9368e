//! Long-form synthesis orchestration.
//!
//! Text is chunked up front. Chunks are then processed one after another: the
//! chunk's token stream is windowed, decoded on the shared pool, stitched, and
//! crossfaded onto the previous chunk. Audio is emitted chunk by chunk; the buffered
//! entry point simply collects the stream, so both paths produce identical samples.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::chunker::{Chunk, DEFAULT_MAX_CHUNK_CHARS, TextChunker};
use super::codec::AudioCodec;
use super::hardware::{HardwareProfile, IoMode};
use super::inference::{
    DEFAULT_VOICE, DEFAULT_VOICES, SamplingParams, TokenRequest, TokenSource, TokenStream,
};
use super::stitcher::{DEFAULT_CROSSFADE_MS, SegmentStitcher, StreamingStitcher};
use super::synthesizer::{DecodePool, ParallelSynthesizer};
use super::windower::{AlignmentReport, spawn_token_reader, window_stream};
use crate::errors::{PipelineError, PipelineResult, SynthesisWarning};

/// Chunks buffered between the driver task and the consumer
const STREAM_CHANNEL_CAPACITY: usize = 4;

/// Settings the pipeline reads at construction
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_chunk_chars: usize,
    pub crossfade_ms: u32,
    pub default_voice: String,
    pub voices: Vec<String>,
    pub sampling: SamplingParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            crossfade_ms: DEFAULT_CROSSFADE_MS,
            default_voice: DEFAULT_VOICE.to_string(),
            voices: DEFAULT_VOICES.iter().map(|v| v.to_string()).collect(),
            sampling: SamplingParams::default(),
        }
    }
}

/// One stitched unit of streamed audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub chunk_index: usize,
    pub samples: Vec<i16>,
    pub warnings: Vec<SynthesisWarning>,
}

/// Complete audio of a request
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub chunk_count: usize,
    pub warnings: Vec<SynthesisWarning>,
}

impl SynthesisOutput {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Incremental audio of a request.
///
/// Dropping the stream cancels the request: no further chunk is started and no
/// further window is dispatched.
pub struct SynthesisStream {
    rx: mpsc::Receiver<PipelineResult<PcmChunk>>,
    cancel: CancellationToken,
    chunk_count: usize,
    sample_rate: u32,
    _guard: DropGuard,
}

impl SynthesisStream {
    /// Number of chunks the input was split into
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for SynthesisStream {
    type Item = PipelineResult<PcmChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Text to audio pipeline. Cheap to clone; clones share the decode pool.
#[derive(Clone)]
pub struct SpeechPipeline {
    chunker: TextChunker,
    token_source: Arc<dyn TokenSource>,
    synthesizer: ParallelSynthesizer,
    stitcher: SegmentStitcher,
    profile: HardwareProfile,
    default_voice: String,
    voices: Arc<[String]>,
    sampling: SamplingParams,
}

impl SpeechPipeline {
    pub fn new(
        config: PipelineConfig,
        profile: HardwareProfile,
        token_source: Arc<dyn TokenSource>,
        codec: Arc<dyn AudioCodec>,
    ) -> Self {
        let sample_rate = codec.sample_rate();
        let synthesizer =
            ParallelSynthesizer::new(codec, DecodePool::new(profile.worker_count));

        info!(
            tier = %profile.tier,
            workers = profile.worker_count,
            batch_size = profile.batch_size,
            max_chunk_chars = config.max_chunk_chars,
            crossfade_ms = config.crossfade_ms,
            "Speech pipeline ready"
        );

        Self {
            chunker: TextChunker::new(config.max_chunk_chars),
            token_source,
            synthesizer,
            stitcher: SegmentStitcher::from_millis(sample_rate, config.crossfade_ms),
            profile,
            default_voice: config.default_voice,
            voices: config.voices.into(),
            sampling: config.sampling,
        }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    pub fn sample_rate(&self) -> u32 {
        self.synthesizer.sample_rate()
    }

    pub fn voices(&self) -> &[String] {
        &self.voices
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    /// Configured sampling parameters
    pub fn default_sampling(&self) -> SamplingParams {
        self.sampling
    }

    /// Synthesize the whole input into one buffer.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        params: SamplingParams,
    ) -> PipelineResult<SynthesisOutput> {
        let mut stream = self.synthesize_stream(text, voice, params)?;
        let chunk_count = stream.chunk_count();
        let sample_rate = stream.sample_rate();

        let mut samples = Vec::new();
        let mut warnings = Vec::new();
        while let Some(item) = stream.next().await {
            let chunk = item?;
            samples.extend_from_slice(&chunk.samples);
            warnings.extend(chunk.warnings);
        }

        Ok(SynthesisOutput {
            samples,
            sample_rate,
            chunk_count,
            warnings,
        })
    }

    /// Start synthesis and return a stream of stitched chunks.
    ///
    /// Input validation happens before anything is spawned. Concatenating the
    /// samples of every yielded [`PcmChunk`] gives the same audio as
    /// [`SpeechPipeline::synthesize`].
    pub fn synthesize_stream(
        &self,
        text: &str,
        voice: Option<&str>,
        params: SamplingParams,
    ) -> PipelineResult<SynthesisStream> {
        let voice = self.resolve_voice(voice)?;
        params.validate().map_err(PipelineError::InvalidInput)?;

        let chunks = self.chunker.split(text);
        if chunks.is_empty() {
            return Err(PipelineError::InvalidInput(
                "input text is empty".to_string(),
            ));
        }

        info!(
            chunks = chunks.len(),
            chars = text.chars().count(),
            voice = %voice,
            "Starting synthesis"
        );

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let chunk_count = chunks.len();

        let driver = self.clone();
        let driver_cancel = cancel.clone();
        tokio::spawn(async move {
            driver.drive(chunks, voice, params, tx, driver_cancel).await;
        });

        Ok(SynthesisStream {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
            chunk_count,
            sample_rate: self.sample_rate(),
        })
    }

    fn resolve_voice(&self, voice: Option<&str>) -> PipelineResult<String> {
        let requested = voice
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.default_voice)
            .to_lowercase();

        if self.voices.iter().any(|v| v.eq_ignore_ascii_case(&requested)) {
            Ok(requested)
        } else {
            Err(PipelineError::InvalidInput(format!(
                "unknown voice '{requested}', available: {}",
                self.voices.join(", ")
            )))
        }
    }

    /// Process chunks in order, forwarding stitched audio to the consumer.
    async fn drive(
        self,
        chunks: Vec<Chunk>,
        voice: String,
        params: SamplingParams,
        tx: mpsc::Sender<PipelineResult<PcmChunk>>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let mut joiner = StreamingStitcher::new(self.stitcher.crossfade());
        let mut last_index = None;

        for chunk in &chunks {
            let result = if cancel.is_cancelled() {
                Err(PipelineError::Cancelled {
                    chunk_index: chunk.index,
                })
            } else {
                self.synthesize_chunk(chunk, &voice, params, &cancel).await
            };

            match result {
                Ok((audio, dropped_tokens)) => {
                    let mut warnings = Vec::new();
                    if chunk.hard_split {
                        warnings.push(SynthesisWarning::HardSplit {
                            chunk_index: chunk.index,
                        });
                    }
                    if dropped_tokens > 0 {
                        warnings.push(SynthesisWarning::TokenAlignment {
                            chunk_index: chunk.index,
                            dropped_tokens,
                        });
                    }

                    let pcm = PcmChunk {
                        chunk_index: chunk.index,
                        samples: joiner.push(&audio),
                        warnings,
                    };
                    last_index = Some(chunk.index);

                    if tx.send(Ok(pcm)).await.is_err() {
                        debug!(chunk_index = chunk.index, "Consumer went away, stopping");
                        cancel.cancel();
                        return;
                    }
                }
                Err(err) => {
                    if err.is_cancelled() {
                        info!(chunk_index = chunk.index, "Synthesis cancelled");
                    } else {
                        warn!(
                            chunk_index = chunk.index,
                            stage = %err.stage(),
                            error = %err,
                            "Chunk failed, aborting request"
                        );
                    }

                    let tail = joiner.finish();
                    if let (Some(chunk_index), false) = (last_index, tail.is_empty()) {
                        let _ = tx
                            .send(Ok(PcmChunk {
                                chunk_index,
                                samples: tail,
                                warnings: Vec::new(),
                            }))
                            .await;
                    }
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }

        let tail = joiner.finish();
        if let (Some(chunk_index), false) = (last_index, tail.is_empty()) {
            let _ = tx
                .send(Ok(PcmChunk {
                    chunk_index,
                    samples: tail,
                    warnings: Vec::new(),
                }))
                .await;
        }

        info!(
            chunks = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesis complete"
        );
    }

    /// Synthesize one chunk into stitched audio, returning it with the number of
    /// dropped trailing tokens.
    async fn synthesize_chunk(
        &self,
        chunk: &Chunk,
        voice: &str,
        params: SamplingParams,
        cancel: &CancellationToken,
    ) -> PipelineResult<(Vec<i16>, usize)> {
        let chunk_index = chunk.index;
        let request = TokenRequest::new(chunk_index, chunk.text.clone(), voice, params);

        let tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled { chunk_index }),
            opened = self.token_source.stream_tokens(request) => {
                opened.map_err(|e| e.into_pipeline_error(chunk_index))?
            }
        };

        let batch_size = self.profile.batch_size;
        let tokens: TokenStream = match self.profile.io_mode {
            IoMode::Parallel => Box::pin(spawn_token_reader(tokens, batch_size)),
            IoMode::Sequential => tokens,
        };

        let report = AlignmentReport::default();
        let windows = window_stream(chunk_index, tokens, batch_size, report.clone())
            .map(move |window| window.map_err(|e| e.into_pipeline_error(chunk_index)));

        let segments = self
            .synthesizer
            .synthesize_chunk(chunk_index, windows, cancel)
            .await?;
        let audio = self.stitcher.stitch_segments(&segments);

        debug!(
            chunk_index,
            windows = segments.len(),
            samples = audio.len(),
            "Chunk synthesized"
        );

        Ok((audio, report.dropped_tokens()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::CodecResult;
    use crate::core::inference::InferenceResult;
    use crate::core::tokens::Window;
    use async_trait::async_trait;

    struct SilentSource;

    #[async_trait]
    impl TokenSource for SilentSource {
        async fn stream_tokens(&self, _request: TokenRequest) -> InferenceResult<TokenStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    struct SilentCodec;

    #[async_trait]
    impl AudioCodec for SilentCodec {
        async fn decode(&self, window: &Window) -> CodecResult<Vec<i16>> {
            Ok(vec![0; window.frame_count()])
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    fn pipeline() -> SpeechPipeline {
        SpeechPipeline::new(
            PipelineConfig::default(),
            HardwareProfile::cpu(),
            Arc::new(SilentSource),
            Arc::new(SilentCodec),
        )
    }

    #[tokio::test]
    async fn test_rejects_empty_text() {
        let err = pipeline()
            .synthesize("   ", None, SamplingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rejects_unknown_voice() {
        let err = pipeline()
            .synthesize_stream("Hello.", Some("nobody"), SamplingParams::default())
            .err()
            .expect("unknown voice rejected");
        assert!(err.to_string().contains("nobody"));
    }

    #[tokio::test]
    async fn test_voice_lookup_is_case_insensitive() {
        let output = pipeline()
            .synthesize("Hello.", Some("LEO"), SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(output.chunk_count, 1);
        assert!(output.samples.is_empty());
        assert_eq!(output.sample_rate, 24_000);
    }

    #[tokio::test]
    async fn test_rejects_invalid_sampling() {
        let params = SamplingParams {
            max_tokens: 0,
            ..Default::default()
        };
        let err = pipeline()
            .synthesize("Hello.", None, params)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
