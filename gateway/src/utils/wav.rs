//! WAV encoding for 16-bit mono PCM.

use std::io::Cursor;

use bytes::{BufMut, Bytes, BytesMut};

/// Size of a canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Encode a complete WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        let mut pcm = writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            pcm.write_sample(sample);
        }
        pcm.flush()?;
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Header for a WAV stream of unknown length.
///
/// The RIFF and data chunk sizes are set to `0xFFFFFFFF`, which players treat as
/// "read until end of stream".
pub fn streaming_wav_header(sample_rate: u32) -> Bytes {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = BytesMut::with_capacity(WAV_HEADER_LEN);
    header.put_slice(b"RIFF");
    header.put_u32_le(u32::MAX);
    header.put_slice(b"WAVE");
    header.put_slice(b"fmt ");
    header.put_u32_le(16);
    header.put_u16_le(1);
    header.put_u16_le(CHANNELS);
    header.put_u32_le(sample_rate);
    header.put_u32_le(byte_rate);
    header.put_u16_le(block_align);
    header.put_u16_le(BITS_PER_SAMPLE);
    header.put_slice(b"data");
    header.put_u32_le(u32::MAX);
    header.freeze()
}

/// Little-endian bytes of a PCM buffer
pub fn pcm_to_bytes(samples: &[i16]) -> Bytes {
    let mut out = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(sample);
    }
    out.freeze()
}

/// Re-slices PCM into frames of a fixed duration.
#[derive(Debug)]
pub struct PcmFramer {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl PcmFramer {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        let frame_samples = (sample_rate as usize * frame_ms as usize / 1000).max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Buffer `samples` and return every frame that is now complete.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Bytes> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_samples * self.frame_samples;
        let frames = self.pending[..complete]
            .chunks_exact(self.frame_samples)
            .map(pcm_to_bytes)
            .collect();
        self.pending.drain(..complete);
        frames
    }

    /// Remaining samples as one zero-padded frame, if any are buffered.
    pub fn finish(mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.frame_samples, 0);
        Some(pcm_to_bytes(&self.pending))
    }
}
