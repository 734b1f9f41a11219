//! Audio transport and playback.
//!
//! - [`codec`] converts between float sample buffers and the wire-safe
//!   base64 PCM16LE representation the streaming protocol carries.
//! - [`playback`] schedules decoded agent speech gaplessly and owns the
//!   output-device sink abstraction.

pub mod codec;
pub mod playback;

pub use codec::{
    decode_frame, encode_frame, f32_to_pcm16le, pcm16le_to_f32, resample_linear,
    INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use playback::{AudioSink, NullSink, PlaybackClock, RodioSink};
