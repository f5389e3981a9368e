//! Crossfade stitching of decoded audio.
//!
//! Adjacent pieces of audio overlap by a fixed crossfade and are blended linearly:
//! `out[j] = a[j] * (1 - t) + b[j] * t` with `t = j / n`. When either side is
//! shorter than the crossfade, the overlap shrinks to the shorter length. The same
//! join is applied between windows of a chunk and between chunks.

use tracing::trace;

use super::synthesizer::AudioSegment;

/// Default crossfade length in milliseconds
pub const DEFAULT_CROSSFADE_MS: u32 = 50;

/// Crossfade length in samples for a sample rate
pub fn crossfade_samples(sample_rate: u32, crossfade_ms: u32) -> usize {
    (u64::from(sample_rate) * u64::from(crossfade_ms) / 1000) as usize
}

/// Append `next` to `acc`, blending the overlapping region.
pub fn crossfade_into(acc: &mut Vec<i16>, next: &[i16], crossfade: usize) {
    let overlap = crossfade.min(acc.len()).min(next.len());
    let start = acc.len() - overlap;

    for (j, (out, &incoming)) in acc[start..].iter_mut().zip(next).enumerate() {
        let t = j as f32 / overlap as f32;
        let blended = f32::from(*out) * (1.0 - t) + f32::from(incoming) * t;
        *out = blended.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }

    acc.extend_from_slice(&next[overlap..]);
}

/// Buffered stitcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStitcher {
    crossfade: usize,
}

impl SegmentStitcher {
    pub fn new(crossfade_samples: usize) -> Self {
        Self {
            crossfade: crossfade_samples,
        }
    }

    pub fn from_millis(sample_rate: u32, crossfade_ms: u32) -> Self {
        Self::new(crossfade_samples(sample_rate, crossfade_ms))
    }

    pub fn crossfade(&self) -> usize {
        self.crossfade
    }

    /// Join pieces of audio in the given order
    pub fn stitch<'a, I>(&self, pieces: I) -> Vec<i16>
    where
        I: IntoIterator<Item = &'a [i16]>,
    {
        let mut out = Vec::new();
        for piece in pieces {
            crossfade_into(&mut out, piece, self.crossfade);
        }
        out
    }

    /// Join the decoded windows of one chunk.
    ///
    /// Segments must already be in ascending window order.
    pub fn stitch_segments(&self, segments: &[AudioSegment]) -> Vec<i16> {
        debug_assert!(
            segments
                .windows(2)
                .all(|pair| pair[0].window_index < pair[1].window_index)
        );
        trace!(segments = segments.len(), "Stitching chunk segments");
        self.stitch(segments.iter().map(|s| s.samples.as_slice()))
    }

    /// Join whole-chunk audio in chunk order
    pub fn join_chunks(&self, chunks: &[Vec<i16>]) -> Vec<i16> {
        self.stitch(chunks.iter().map(Vec::as_slice))
    }
}

/// Incremental inter-chunk join.
///
/// Holds back only the tail the next chunk will overlap. Concatenating every
/// `push` result and the final `finish` yields exactly the buffered join.
#[derive(Debug, Clone)]
pub struct StreamingStitcher {
    crossfade: usize,
    pending: Vec<i16>,
}

impl StreamingStitcher {
    pub fn new(crossfade_samples: usize) -> Self {
        Self {
            crossfade: crossfade_samples,
            pending: Vec::new(),
        }
    }

    /// Add one chunk's audio, returning the samples that are now final
    pub fn push(&mut self, chunk_audio: &[i16]) -> Vec<i16> {
        let mut combined = std::mem::take(&mut self.pending);
        crossfade_into(&mut combined, chunk_audio, self.crossfade);

        let hold = self.crossfade.min(combined.len());
        self.pending = combined.split_off(combined.len() - hold);
        combined
    }

    /// Number of samples currently held back
    pub fn held_back(&self) -> usize {
        self.pending.len()
    }

    /// Release the held-back tail
    pub fn finish(self) -> Vec<i16> {
        self.pending
    }
}
