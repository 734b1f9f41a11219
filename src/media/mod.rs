//! Media capture layer.
//!
//! Owns the camera+microphone and screen-share streams for the
//! lifetime of one session. Tracks are cheap-clone handles: the
//! capture side pushes frames in, downstream consumers (streaming
//! client, proctoring monitor, recorder) subscribe independently.
//!
//! Acquisition is all-or-nothing: if either the camera+microphone or
//! the screen share is denied, the whole acquisition fails and no
//! partial stream is retained. Release stops every track and is
//! idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::error::SessionError;

#[cfg(feature = "devices")]
pub mod devices;

// ── Constants ──────────────────────────────────────────────────────

/// Samples per microphone frame at the 16 kHz transport rate.
pub const MIC_FRAME_SAMPLES: usize = 4096;

// ── Microphone track ───────────────────────────────────────────────

/// Mono microphone track carrying 16 kHz f32 frames.
///
/// The mute toggle only gates what transport consumers should send:
/// a muted track keeps producing frames (so the audio proctor still
/// sees real samples) and keeps the streaming session open; the
/// outbound producer substitutes silence instead.
#[derive(Clone)]
pub struct MicrophoneTrack {
    inner: Arc<MicInner>,
}

struct MicInner {
    frames: broadcast::Sender<Vec<f32>>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MicrophoneTrack {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MicInner {
                frames,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Push one captured frame. No-op once the track is stopped.
    pub fn push_frame(&self, frame: Vec<f32>) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let _ = self.inner.frames.send(frame);
    }

    /// Subscribe to raw frames (mute-independent).
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<f32>> {
        self.inner.frames.subscribe()
    }

    /// Toggle sound capture for transport. Does not touch the stream.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Apply the mute state to a frame bound for transport: a muted
    /// candidate appears to produce silence, and the streaming session
    /// stays open.
    pub fn transport_frame(&self, mut frame: Vec<f32>) -> Vec<f32> {
        if !self.is_enabled() {
            frame.iter_mut().for_each(|s| *s = 0.0);
        }
        frame
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Default for MicrophoneTrack {
    fn default() -> Self {
        Self::new()
    }
}

// ── Video track ────────────────────────────────────────────────────

/// One uncompressed RGB8 video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8, `width * height * 3` bytes.
    pub rgb: Vec<u8>,
}

/// Video track exposing the most recent frame.
///
/// Proctoring samples frames on its own schedule, so only the latest
/// frame is retained; older frames are overwritten unseen.
#[derive(Clone)]
pub struct VideoTrack {
    inner: Arc<VideoInner>,
}

struct VideoInner {
    latest: watch::Sender<Option<VideoFrame>>,
    stopped: AtomicBool,
}

impl VideoTrack {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(VideoInner {
                latest,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Publish a new frame. No-op once the track is stopped.
    pub fn push_frame(&self, frame: VideoFrame) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let _ = self.inner.latest.send(Some(frame));
    }

    /// Snapshot the most recent frame, if any has arrived yet.
    pub fn latest(&self) -> Option<VideoFrame> {
        self.inner.latest.subscribe().borrow().clone()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let _ = self.inner.latest.send(None);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Default for VideoTrack {
    fn default() -> Self {
        Self::new()
    }
}

// ── Stream pair ────────────────────────────────────────────────────

/// Camera stream: microphone audio plus webcam video.
pub struct CameraStream {
    pub microphone: MicrophoneTrack,
    pub video: VideoTrack,
}

/// Screen-share stream: video only.
pub struct ScreenStream {
    pub video: VideoTrack,
}

/// The session's media streams, owned by the orchestrator.
pub struct MediaStreamPair {
    pub camera: CameraStream,
    pub screen: ScreenStream,
    released: AtomicBool,
}

impl MediaStreamPair {
    pub fn new() -> Self {
        Self {
            camera: CameraStream {
                microphone: MicrophoneTrack::new(),
                video: VideoTrack::new(),
            },
            screen: ScreenStream {
                video: VideoTrack::new(),
            },
            released: AtomicBool::new(false),
        }
    }

    /// Stop every track. Safe to call repeatedly; the second call is a
    /// no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.camera.microphone.stop();
        self.camera.video.stop();
        self.screen.video.stop();
        tracing::debug!("Media streams released");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Default for MediaStreamPair {
    fn default() -> Self {
        Self::new()
    }
}

// ── Backend seam ───────────────────────────────────────────────────

/// Acquires the session's media streams.
///
/// Implementations request camera+microphone and, independently, the
/// screen share; if either is denied or unavailable they must return
/// [`SessionError::PermissionDenied`] and leave no live tracks behind.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn acquire(&self) -> Result<MediaStreamPair, SessionError>;
}

// ── Tests ──────────────────────────────────────────────────────────
