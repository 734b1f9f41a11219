//! Agent speech playback.
//!
//! Synthesized speech arrives as a stream of short PCM buffers. To play
//! back-to-back buffers without audible gaps or overlaps, each buffer
//! starts at the later of "now" and the previous buffer's computed end
//! time; [`PlaybackClock`] accumulates that schedule across the
//! session. [`AudioSink`] is the output-device seam; the default
//! [`RodioSink`] queues buffers on a dedicated audio thread, and
//! [`NullSink`] discards them for headless hosts and tests.

use std::sync::mpsc;
use std::thread;

// ── Gapless schedule ───────────────────────────────────────────────

/// Computes gapless start times for sequentially arriving buffers.
#[derive(Debug, Default)]
pub struct PlaybackClock {
    next_start: f64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a buffer of `duration_secs` at wall-clock `now_secs`.
    ///
    /// Returns the buffer's start time: `max(now, previous end)`. The
    /// computed end becomes the floor for the next buffer.
    pub fn schedule(&mut self, now_secs: f64, duration_secs: f64) -> f64 {
        let start = if now_secs > self.next_start {
            now_secs
        } else {
            self.next_start
        };
        self.next_start = start + duration_secs;
        start
    }

    /// End time of the last scheduled buffer.
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Drop the accumulated schedule (after an interruption or stop).
    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }
}

// ── Sink abstraction ───────────────────────────────────────────────

/// Output sink for decoded agent speech.
pub trait AudioSink: Send + Sync {
    /// Queue a mono buffer for gapless playback after anything already
    /// queued. Fire-and-forget.
    fn enqueue(&self, samples: Vec<f32>, sample_rate: u32);

    /// Set playback volume (0.0–2.0).
    fn set_volume(&self, volume: f32);

    /// Stop and discard all queued and playing buffers.
    fn stop_all(&self);
}

/// Sink that discards everything. For headless hosts and tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn enqueue(&self, _samples: Vec<f32>, _sample_rate: u32) {}
    fn set_volume(&self, _volume: f32) {}
    fn stop_all(&self) {}
}

// ── Rodio sink ─────────────────────────────────────────────────────

enum SinkCommand {
    Enqueue { samples: Vec<f32>, sample_rate: u32 },
    SetVolume(f32),
    StopAll,
    Shutdown,
}

/// Device-backed sink on a dedicated audio thread.
///
/// The output stream handle is not `Send`, so a single thread owns it
/// and drains a command channel; rodio's queued sink plays appended
/// buffers contiguously, realizing the [`PlaybackClock`] schedule on
/// the device side. The stream is opened lazily on the first buffer so
/// constructing the sink never fails on machines without audio output.
pub struct RodioSink {
    tx: mpsc::Sender<SinkCommand>,
}

impl RodioSink {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<SinkCommand>();
        if let Err(e) = thread::Builder::new()
            .name("intervox-playback".into())
            .spawn(move || Self::run(rx))
        {
            // No thread means no playback; commands drop silently.
            tracing::error!(error = %e, "Failed to spawn playback thread");
        }
        Self { tx }
    }

    fn run(rx: mpsc::Receiver<SinkCommand>) {
        let mut stream: Option<(rodio::OutputStream, rodio::OutputStreamHandle)> = None;
        let mut sink: Option<rodio::Sink> = None;
        let mut volume: f32 = 1.0;

        while let Ok(cmd) = rx.recv() {
            match cmd {
                SinkCommand::Enqueue {
                    samples,
                    sample_rate,
                } => {
                    if stream.is_none() {
                        match rodio::OutputStream::try_default() {
                            Ok(pair) => stream = Some(pair),
                            Err(e) => {
                                tracing::warn!(error = %e, "No audio output device; dropping agent speech");
                                continue;
                            }
                        }
                    }
                    if sink.is_none() {
                        if let Some((_, handle)) = &stream {
                            match rodio::Sink::try_new(handle) {
                                Ok(s) => {
                                    s.set_volume(volume);
                                    sink = Some(s);
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to open playback sink");
                                    continue;
                                }
                            }
                        }
                    }
                    if let Some(s) = &sink {
                        s.append(rodio::buffer::SamplesBuffer::new(1, sample_rate, samples));
                    }
                }
                SinkCommand::SetVolume(v) => {
                    volume = v;
                    if let Some(s) = &sink {
                        s.set_volume(v);
                    }
                }
                SinkCommand::StopAll => {
                    // Drop the sink rather than reuse a stopped one; the
                    // next enqueue opens a fresh queue.
                    if let Some(s) = sink.take() {
                        s.stop();
                    }
                }
                SinkCommand::Shutdown => break,
            }
        }
    }
}

impl Default for RodioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for RodioSink {
    fn enqueue(&self, samples: Vec<f32>, sample_rate: u32) {
        let _ = self.tx.send(SinkCommand::Enqueue {
            samples,
            sample_rate,
        });
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.tx.send(SinkCommand::SetVolume(volume.clamp(0.0, 2.0)));
    }

    fn stop_all(&self) {
        let _ = self.tx.send(SinkCommand::StopAll);
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        let _ = self.tx.send(SinkCommand::Shutdown);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
