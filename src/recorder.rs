//! Session recorder.
//!
//! Records the candidate's stream from the moment media capture
//! succeeds, not gated on the remote session being open, so early
//! agent speech still lands alongside the candidate's reactions.
//! Container chunks accumulate as the encoder emits them; `stop()`
//! drains the final chunk, concatenates and returns a persistable
//! data-URL string. Recording is best-effort: if nothing was recorded
//! the session still ends cleanly with an empty artifact.

use base64::Engine;
use tokio::sync::{broadcast, oneshot};

use crate::error::SessionError;
use crate::media::MicrophoneTrack;

// ── Encoder seam ───────────────────────────────────────────────────

/// Encodes captured frames into a container format.
///
/// Implementations may emit chunks incrementally or buffer until
/// [`finish`]. The default [`WavEncoder`] covers the audio track; a
/// host with a full A/V muxer plugs in here without touching the
/// recorder's accumulate/drain logic.
pub trait MediaEncoder: Send {
    /// MIME type of the finished container.
    fn mime_type(&self) -> &'static str;

    /// Consume one microphone frame; may emit a container chunk.
    fn write_audio_frame(&mut self, samples: &[f32]) -> Result<Option<Vec<u8>>, SessionError>;

    /// Flush and emit the final chunk, if any.
    fn finish(&mut self) -> Result<Option<Vec<u8>>, SessionError>;
}

/// WAV container encoder for the microphone track (16 kHz mono PCM16).
pub struct WavEncoder {
    sample_rate: u32,
    samples: Vec<i16>,
}

impl WavEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
        }
    }
}

impl MediaEncoder for WavEncoder {
    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }

    fn write_audio_frame(&mut self, samples: &[f32]) -> Result<Option<Vec<u8>>, SessionError> {
        self.samples.extend(
            samples
                .iter()
                .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
        );
        // WAV needs its header finalized; everything goes out in the
        // single finish() chunk.
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.samples.is_empty() {
            return Ok(None);
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| SessionError::Recording(format!("wav header: {e}")))?;
            for s in self.samples.drain(..) {
                writer
                    .write_sample(s)
                    .map_err(|e| SessionError::Recording(format!("wav sample: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| SessionError::Recording(format!("wav finalize: {e}")))?;
        }
        Ok(Some(cursor.into_inner()))
    }
}

// ── Recorder ───────────────────────────────────────────────────────

struct RecordingOutput {
    mime: String,
    bytes: Vec<u8>,
}

/// Accumulates container chunks for one session.
pub struct SessionRecorder {
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<RecordingOutput>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionRecorder {
    /// Start recording the microphone track through `encoder`.
    pub fn start(track: &MicrophoneTrack, mut encoder: Box<dyn MediaEncoder + Send>) -> Self {
        // Subscribe before spawning so no frame emitted after this
        // call can be missed.
        let mut frames = track.subscribe();
        let mime = encoder.mime_type().to_string();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<RecordingOutput>();

        let task = tokio::spawn(async move {
            let mut chunks: Vec<Vec<u8>> = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    result = frames.recv() => match result {
                        Ok(frame) => match encoder.write_audio_frame(&frame) {
                            Ok(Some(chunk)) => chunks.push(chunk),
                            Ok(None) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "Recorder encode failed; frame dropped");
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Recorder lagged; frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Track released before stop; hold what we
                            // have until the stop request arrives.
                            let _ = (&mut stop_rx).await;
                            break;
                        }
                    },
                }
            }

            // Drain the final chunk before reporting.
            match encoder.finish() {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Recorder finalize failed; partial recording kept");
                }
            }
            let bytes = chunks.concat();
            tracing::debug!(bytes = bytes.len(), "Recording drained");
            let _ = done_tx.send(RecordingOutput { mime, bytes });
        });

        Self {
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
            task: Some(task),
        }
    }

    /// Stop recording, wait for the final chunk and return the
    /// persistable encoding: `data:<mime>;base64,...`, or an empty
    /// string if nothing was recorded. Never fails the session end.
    pub async fn stop(&mut self) -> String {
        let Some(stop_tx) = self.stop_tx.take() else {
            return String::new();
        };
        let _ = stop_tx.send(());
        let Some(done_rx) = self.done_rx.take() else {
            return String::new();
        };
        match done_rx.await {
            Ok(output) if !output.bytes.is_empty() => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(&output.bytes);
                format!("data:{};base64,{b64}", output.mime)
            }
            _ => String::new(),
        }
    }

    /// Abandon the recording without producing an artifact (forced
    /// termination path).
    pub fn discard(&mut self) {
        self.stop_tx.take();
        self.done_rx.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
