//! Audio transport codec.
//!
//! The streaming protocol carries audio as base64-encoded 16-bit
//! little-endian PCM inside a JSON control envelope. Capture and
//! playback use independent sample rates: microphone frames must reach
//! the wire at 16 kHz mono, agent speech arrives at 24 kHz mono. The
//! rates never need to match; they belong to separate streams.

use base64::Engine;

use crate::error::SessionError;

// ── Constants ──────────────────────────────────────────────────────

/// Sample rate the remote service expects for microphone input.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized agent speech.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

// ── Sample conversion ──────────────────────────────────────────────

/// Pack normalized float samples into little-endian PCM16 bytes.
///
/// Inputs are clamped to [-1, 1] before scaling, so out-of-range
/// samples saturate instead of wrapping.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian PCM16 bytes into normalized float samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

// ── Wire encoding ──────────────────────────────────────────────────

/// Encode one microphone frame for transport.
pub fn encode_frame(samples: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(f32_to_pcm16le(samples))
}

/// Decode one inbound base64 PCM payload into playable samples.
pub fn decode_frame(payload: &str) -> Result<Vec<f32>, SessionError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| SessionError::Codec(format!("invalid base64 audio payload: {e}")))?;
    Ok(pcm16le_to_f32(&bytes))
}

// ── Resampling ─────────────────────────────────────────────────────

/// Linear resampler for the capture path.
///
/// Audio devices rarely run at the 16 kHz transport rate natively;
/// this brings a captured frame to the target rate before it reaches
/// the codec. Quality is adequate for speech transcription.
pub fn resample_linear(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_hz as f64 / to_hz as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────
