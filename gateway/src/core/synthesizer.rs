//! Order-preserving parallel window decoding.
//!
//! Windows of a chunk are decoded concurrently on a process-wide pool of
//! `worker_count` permits. Results may complete in any order; a [`ReorderBuffer`]
//! releases them strictly by window index.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::codec::{AudioCodec, CodecError, CodecResult};
use super::tokens::Window;
use crate::errors::{PipelineError, PipelineResult};

/// Decoded audio of one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub chunk_index: usize,
    pub window_index: usize,
    pub samples: Vec<i16>,
    /// First window of its chunk
    pub is_first: bool,
    /// Last window of its chunk
    pub is_last: bool,
}

/// Holds out-of-order results until their predecessors arrive.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    held: BTreeMap<usize, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            held: BTreeMap::new(),
        }
    }

    /// Index of the next item to be released
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Items waiting for a predecessor
    pub fn pending(&self) -> usize {
        self.held.len()
    }

    /// Insert a result and return every item that is now releasable, in order.
    pub fn insert(&mut self, index: usize, item: T) -> Vec<(usize, T)> {
        if index < self.next {
            return Vec::new();
        }
        self.held.insert(index, item);

        let mut released = Vec::new();
        while let Some(item) = self.held.remove(&self.next) {
            released.push((self.next, item));
            self.next += 1;
        }
        released
    }
}

/// Fair pool of decode permits shared by every request of the process.
#[derive(Debug, Clone)]
pub struct DecodePool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl DecodePool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a decode
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Decodes a chunk's windows on the shared pool and returns them in order.
#[derive(Clone)]
pub struct ParallelSynthesizer {
    codec: Arc<dyn AudioCodec>,
    pool: DecodePool,
    max_in_flight: usize,
}

impl ParallelSynthesizer {
    pub fn new(codec: Arc<dyn AudioCodec>, pool: DecodePool) -> Self {
        let max_in_flight = pool.size() * 2;
        Self {
            codec,
            pool,
            max_in_flight,
        }
    }

    pub fn pool(&self) -> &DecodePool {
        &self.pool
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn sample_rate(&self) -> u32 {
        self.codec.sample_rate()
    }

    /// Decode every window of one chunk.
    ///
    /// At most `max_in_flight` windows are dispatched at once; while that bound is
    /// reached the window stream is not polled. The first decode failure aborts the
    /// chunk. On cancellation no further window is dispatched and the call returns
    /// [`PipelineError::Cancelled`] once in-flight decodes have finished.
    pub async fn synthesize_chunk<S>(
        &self,
        chunk_index: usize,
        windows: S,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<AudioSegment>>
    where
        S: Stream<Item = PipelineResult<Window>> + Send,
    {
        let mut windows = pin!(windows);
        let mut in_flight: JoinSet<(usize, CodecResult<Vec<i16>>)> = JoinSet::new();
        let mut reorder = ReorderBuffer::new();
        let mut ordered: Vec<Vec<i16>> = Vec::new();
        let mut exhausted = false;

        loop {
            if exhausted && in_flight.is_empty() {
                break;
            }
            let can_dispatch = !exhausted && in_flight.len() < self.max_in_flight;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    let draining = in_flight.len();
                    while in_flight.join_next().await.is_some() {}
                    info!(chunk_index, drained = draining, "Chunk synthesis cancelled");
                    return Err(PipelineError::Cancelled { chunk_index });
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    // Decode panics are caught inside the task, so a join error
                    // means the task was aborted and its window is unknown.
                    let (window_index, result) = joined.map_err(|e| PipelineError::Synthesis {
                        chunk_index,
                        window_index: reorder.next_index(),
                        message: format!("decode task for an unknown window failed: {e}"),
                    })?;

                    let samples = result.map_err(|e| {
                        error!(chunk_index, window_index, error = %e, "Window decode failed");
                        PipelineError::Synthesis {
                            chunk_index,
                            window_index,
                            message: e.to_string(),
                        }
                    })?;

                    ordered.extend(reorder.insert(window_index, samples).into_iter().map(|(_, s)| s));
                }

                next = windows.next(), if can_dispatch => {
                    match next {
                        Some(Ok(window)) => self.dispatch(&mut in_flight, window),
                        Some(Err(e)) => return Err(e),
                        None => exhausted = true,
                    }
                }
            }
        }

        if reorder.pending() > 0 {
            return Err(PipelineError::Synthesis {
                chunk_index,
                window_index: reorder.next_index(),
                message: "window sequence has a gap".to_string(),
            });
        }

        let count = ordered.len();
        debug!(chunk_index, windows = count, "Chunk decoded");

        Ok(ordered
            .into_iter()
            .enumerate()
            .map(|(window_index, samples)| AudioSegment {
                chunk_index,
                window_index,
                samples,
                is_first: window_index == 0,
                is_last: window_index + 1 == count,
            })
            .collect())
    }

    fn dispatch(&self, in_flight: &mut JoinSet<(usize, CodecResult<Vec<i16>>)>, window: Window) {
        let codec = Arc::clone(&self.codec);
        let semaphore = Arc::clone(&self.pool.semaphore);

        in_flight.spawn(async move {
            let index = window.index();
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => AssertUnwindSafe(codec.decode(&window))
                    .catch_unwind()
                    .await
                    .unwrap_or(Err(CodecError::Panicked)),
                Err(_) => Err(CodecError::Configuration("decode pool closed".to_string())),
            };
            (index, result)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tokens::{Frame, Token};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Decodes each window to a constant signal equal to its index, with delays that
    /// make later windows finish first.
    struct ReversedDelayCodec {
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl ReversedDelayCodec {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_at,
            }
        }
    }

    #[async_trait]
    impl AudioCodec for ReversedDelayCodec {
        async fn decode(&self, window: &Window) -> CodecResult<Vec<i16>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = 5 * (8 - (window.index() % 8)) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_at == Some(window.index()) {
                return Err(CodecError::InvalidAudio("corrupt window".to_string()));
            }
            Ok(vec![window.index() as i16; 4])
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    fn window(index: usize) -> Window {
        let token = Token::new(1).unwrap();
        Window::new(index, vec![Frame::new([token; 7])]).unwrap()
    }

    fn windows(count: usize) -> impl Stream<Item = PipelineResult<Window>> + Send {
        futures::stream::iter((0..count).map(|i| Ok(window(i))))
    }

    #[test]
    fn test_reorder_buffer_releases_in_order() {
        let mut buffer = ReorderBuffer::new();
        assert!(buffer.insert(2, "c").is_empty());
        assert!(buffer.insert(1, "b").is_empty());
        assert_eq!(buffer.pending(), 2);
        assert_eq!(buffer.insert(0, "a"), vec![(0, "a"), (1, "b"), (2, "c")]);
        assert_eq!(buffer.next_index(), 3);
        assert!(buffer.insert(1, "dup").is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_completion_is_reordered() {
        let codec = Arc::new(ReversedDelayCodec::new(None));
        let synthesizer = ParallelSynthesizer::new(codec.clone(), DecodePool::new(4));

        let segments = synthesizer
            .synthesize_chunk(3, windows(12), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(segments.len(), 12);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.window_index, i);
            assert_eq!(segment.chunk_index, 3);
            assert_eq!(segment.samples[0], i as i16);
        }
        assert!(segments[0].is_first && !segments[0].is_last);
        assert!(segments[11].is_last);
        assert!(codec.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let codec = Arc::new(ReversedDelayCodec::new(None));
        let synthesizer = ParallelSynthesizer::new(codec.clone(), DecodePool::new(2));
        assert_eq!(synthesizer.max_in_flight(), 4);

        synthesizer
            .synthesize_chunk(0, windows(10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(codec.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(synthesizer.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_aborts_chunk() {
        let codec = Arc::new(ReversedDelayCodec::new(Some(5)));
        let synthesizer = ParallelSynthesizer::new(codec, DecodePool::new(3));

        let err = synthesizer
            .synthesize_chunk(2, windows(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Synthesis {
                chunk_index: 2,
                window_index: 5,
                message: "codec returned malformed audio: corrupt window".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_window_stream_error_is_returned() {
        let codec = Arc::new(ReversedDelayCodec::new(None));
        let synthesizer = ParallelSynthesizer::new(codec, DecodePool::new(2));
        let stream = windows(3).chain(futures::stream::iter(vec![Err(
            PipelineError::UpstreamTimeout {
                chunk_index: 1,
                timeout_ms: 10,
            },
        )]));

        let err = synthesizer
            .synthesize_chunk(1, stream, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UpstreamTimeout { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let codec = Arc::new(ReversedDelayCodec::new(None));
        let synthesizer = ParallelSynthesizer::new(codec.clone(), DecodePool::new(2));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = synthesizer
            .synthesize_chunk(0, windows(5), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled { chunk_index: 0 });
        assert_eq!(codec.peak.load(Ordering::SeqCst), 0);
    }

    /// Panics on one window and never finishes the others.
    struct PanickingCodec {
        panic_at: usize,
    }

    #[async_trait]
    impl AudioCodec for PanickingCodec {
        async fn decode(&self, window: &Window) -> CodecResult<Vec<i16>> {
            if window.index() == self.panic_at {
                panic!("decoder crashed");
            }
            std::future::pending().await
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }
    }

    #[tokio::test]
    async fn test_decode_panic_reports_its_window() {
        let codec = Arc::new(PanickingCodec { panic_at: 2 });
        let synthesizer = ParallelSynthesizer::new(codec, DecodePool::new(4));

        let err = synthesizer
            .synthesize_chunk(1, windows(6), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Synthesis {
                chunk_index: 1,
                window_index: 2,
                message: CodecError::Panicked.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_blocked_decodes_stop_window_pulls() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let stream = futures::stream::iter((0..100).map(|i| Ok(window(i)))).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // Window 100 never arrives, so every decode blocks
        let codec = Arc::new(PanickingCodec { panic_at: 100 });
        let synthesizer = ParallelSynthesizer::new(codec, DecodePool::new(2));

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            synthesizer.synthesize_chunk(0, stream, &CancellationToken::new()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(pulled.load(Ordering::SeqCst), synthesizer.max_in_flight());
        assert_eq!(synthesizer.max_in_flight(), 4);
    }

    #[tokio::test]
    async fn test_empty_chunk_yields_no_segments() {
        let codec = Arc::new(ReversedDelayCodec::new(None));
        let synthesizer = ParallelSynthesizer::new(codec, DecodePool::new(2));
        let segments = synthesizer
            .synthesize_chunk(0, windows(0), &CancellationToken::new())
            .await
            .unwrap();
        assert!(segments.is_empty());
    }
}
