//! On-device speech synthesis seam.
//!
//! Only used for spoken proctoring warnings ("please return to the
//! camera"), so the surface is one method. The host wires in its
//! platform TTS; [`LoggingSpeech`] is the headless default.

use async_trait::async_trait;

/// Speaks a short warning to the candidate.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Cancel any in-progress utterance, speak `text`, and return once
    /// the utterance has finished (or failed; failures are swallowed,
    /// a missed warning must not break proctoring).
    async fn speak(&self, text: &str);
}

/// Default synthesizer: logs the warning and completes immediately.
#[derive(Debug, Default)]
pub struct LoggingSpeech;

#[async_trait]
impl SpeechSynthesizer for LoggingSpeech {
    async fn speak(&self, text: &str) {
        tracing::info!(text = %text, "Spoken warning (no TTS backend)");
    }
}
