//! Audio framing shared between capture clients and the relay

pub mod frame;

pub use frame::{
    BYTES_PER_SAMPLE, FRAME_BYTES, FRAME_DURATION_MS, FRAME_SAMPLES, FrameAccumulator,
    SAMPLE_RATE, decode_frame, encode_frame, encode_sample, is_full_frame,
};
