//! Audio frame contract shared by the browser capture pipeline and the relay.
//!
//! A frame is a fixed block of [`FRAME_SAMPLES`] signed 16-bit little-endian
//! PCM samples, mono, nominally at [`SAMPLE_RATE`]. The relay treats frames
//! as opaque payloads; the types in this module are for producers (the
//! browser client, the `vad-replay` tool) and for diagnostics.

use bytes::{BufMut, Bytes, BytesMut};

/// Nominal capture sample rate in Hz
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame (protocol constant, version 1)
pub const FRAME_SAMPLES: usize = 2048;

/// Bytes per encoded sample (16-bit PCM)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Encoded frame length in bytes
pub const FRAME_BYTES: usize = FRAME_SAMPLES * BYTES_PER_SAMPLE;

/// Duration of a single frame in milliseconds (128 ms at 16 kHz)
pub const FRAME_DURATION_MS: u64 = (FRAME_SAMPLES as u64 * 1000) / SAMPLE_RATE as u64;

/// Convert a floating point sample to 16-bit PCM.
///
/// The input is clamped to `[-1.0, 1.0]`, negative values are scaled by
/// 32768 and non-negative values by 32767 so both ends of the range map
/// exactly onto `i16::MIN` and `i16::MAX`. NaN encodes as silence.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Returns true when `len` bytes is exactly one protocol frame
#[inline]
pub fn is_full_frame(len: usize) -> bool {
    len == FRAME_BYTES
}

/// Accumulates samples and emits only complete, encoded frames.
///
/// Samples that do not fill a frame stay buffered until more arrive. A
/// trailing partial frame is never emitted implicitly; callers that need it
/// must ask for [`FrameAccumulator::flush_padded`].
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    pending: Vec<i16>,
    frame_samples: usize,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(FRAME_SAMPLES)
    }
}

impl FrameAccumulator {
    /// Create an accumulator for frames of `frame_samples` samples.
    ///
    /// A zero frame size is bumped to one sample so that no zero-length
    /// frame can ever be produced.
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            pending: Vec::with_capacity(frame_samples),
            frame_samples,
        }
    }

    /// Samples per emitted frame
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Samples buffered toward the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Push floating point samples, returning every frame completed by them
    pub fn push_f32(&mut self, samples: &[f32]) -> Vec<Bytes> {
        self.push_iter(samples.iter().copied().map(encode_sample))
    }

    /// Push already-encoded PCM samples, returning every completed frame
    pub fn push_i16(&mut self, samples: &[i16]) -> Vec<Bytes> {
        self.push_iter(samples.iter().copied())
    }

    fn push_iter(&mut self, samples: impl Iterator<Item = i16>) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_samples {
                frames.push(encode_frame(&self.pending));
                self.pending.clear();
            }
        }
        frames
    }

    /// Emit the buffered partial frame padded with silence.
    ///
    /// Returns `None` when nothing is buffered, so a flush never produces a
    /// frame made entirely of padding.
    pub fn flush_padded(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.frame_samples, 0);
        let frame = encode_frame(&self.pending);
        self.pending.clear();
        Some(frame)
    }

    /// Drop any buffered partial frame
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

/// Encode samples as little-endian 16-bit PCM
pub fn encode_frame(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

/// Decode little-endian 16-bit PCM, ignoring a trailing odd byte
pub fn decode_frame(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
