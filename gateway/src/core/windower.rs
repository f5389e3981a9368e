//! Token to window assembly.
//!
//! Tokens are grouped into frames of seven and frames into windows of seven. A window
//! is emitted as soon as it is complete. At the end of a chunk the remaining complete
//! frames form one final partial window; leftover tokens that do not fill a frame are
//! dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use super::inference::InferenceResult;
use super::tokens::{FRAMES_PER_WINDOW, Frame, TOKENS_PER_FRAME, Token, Window};

/// Incremental frame and window assembler for a single chunk
#[derive(Debug)]
pub struct Windower {
    chunk_index: usize,
    pending: Vec<Token>,
    frames: Vec<Frame>,
    next_index: usize,
}

/// What remains once the token stream of a chunk has ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowerTail {
    pub window: Option<Window>,
    pub dropped_tokens: usize,
}

impl Windower {
    pub fn new(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            pending: Vec::with_capacity(TOKENS_PER_FRAME),
            frames: Vec::with_capacity(FRAMES_PER_WINDOW),
            next_index: 0,
        }
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Number of windows emitted so far
    pub fn windows_emitted(&self) -> usize {
        self.next_index
    }

    /// Feed one token, returning a window when it completes one.
    pub fn push(&mut self, token: Token) -> Option<Window> {
        self.pending.push(token);
        if self.pending.len() < TOKENS_PER_FRAME {
            return None;
        }

        let frame = Frame::from_slice(&self.pending)?;
        self.pending.clear();
        self.frames.push(frame);

        if self.frames.len() < FRAMES_PER_WINDOW {
            return None;
        }
        self.take_window()
    }

    /// Close the chunk: emit the partial window, if any, and report dropped tokens.
    pub fn finish(mut self) -> WindowerTail {
        let dropped_tokens = self.pending.len();
        if dropped_tokens > 0 {
            warn!(
                chunk_index = self.chunk_index,
                dropped_tokens, "Dropping trailing tokens that do not fill a frame"
            );
        }

        let window = if self.frames.is_empty() {
            None
        } else {
            self.take_window()
        };

        WindowerTail {
            window,
            dropped_tokens,
        }
    }

    fn take_window(&mut self) -> Option<Window> {
        let frames = std::mem::replace(&mut self.frames, Vec::with_capacity(FRAMES_PER_WINDOW));
        let window = Window::new(self.next_index, frames)?;
        self.next_index += 1;
        Some(window)
    }
}

/// Shared counter of tokens dropped at the end of a chunk
#[derive(Debug, Clone, Default)]
pub struct AlignmentReport(Arc<AtomicUsize>);

impl AlignmentReport {
    pub fn dropped_tokens(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn record(&self, dropped: usize) {
        self.0.store(dropped, Ordering::Release);
    }
}

/// Turn a token stream into a window stream.
///
/// The token stream is pulled in batches of up to `batch_size` ready tokens. The
/// number of dropped trailing tokens is written to `report` when the stream ends.
pub fn window_stream<S>(
    chunk_index: usize,
    tokens: S,
    batch_size: usize,
    report: AlignmentReport,
) -> impl Stream<Item = InferenceResult<Window>> + Send
where
    S: Stream<Item = InferenceResult<Token>> + Send + Unpin + 'static,
{
    async_stream::try_stream! {
        let mut windower = Windower::new(chunk_index);
        let mut batches = tokens.ready_chunks(batch_size.max(1));

        while let Some(batch) = batches.next().await {
            for item in batch {
                let token = item?;
                if let Some(window) = windower.push(token) {
                    yield window;
                }
            }
        }

        let emitted = windower.windows_emitted();
        let tail = windower.finish();
        report.record(tail.dropped_tokens);
        let partial = tail.window.is_some();
        if let Some(window) = tail.window {
            yield window;
        }

        debug!(
            chunk_index,
            windows = emitted + usize::from(partial),
            partial_window = partial,
            "Chunk token stream windowed"
        );
    }
}

/// Read a token stream on its own task, forwarding tokens through a bounded channel.
///
/// The reader task is aborted when the returned stream is dropped.
pub fn spawn_token_reader<S>(
    tokens: S,
    capacity: usize,
) -> impl Stream<Item = InferenceResult<Token>> + Send + Unpin + 'static
where
    S: Stream<Item = InferenceResult<Token>> + Send + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::channel(capacity.max(1));

    let handle = AbortOnDropHandle::new(tokio::spawn(async move {
        let mut tokens = tokens;
        while let Some(item) = tokens.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    }));

    Box::pin(async_stream::stream! {
        let _reader = handle;
        while let Some(item) = rx.recv().await {
            yield item;
        }
    })
}
