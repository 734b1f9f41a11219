//! intervox — live interview session orchestrator.
//!
//! Drives a real-time spoken interview between a candidate and a
//! remote AI interview agent: media capture, a bidirectional streaming
//! audio session with incremental transcription, integrity proctoring
//! from periodic frame sampling and audio energy analysis, best-effort
//! session recording, and a state machine that ties the lifecycle
//! together and hands back a `{transcript, code, recording}` artifact.
//!
//! ## Architecture
//!
//! ```text
//! MediaBackend ─▸ MediaStreamPair
//!      │               ├── microphone ─▸ LiveClient ─▸ interview agent
//!      │               │                    ◂─ transcription + speech events
//!      │               ├── camera/screen ─▸ ProctorMonitor ─▸ vision oracle
//!      │               └── microphone ─▸ SessionRecorder
//!      └───────────────────▸ InterviewSession (owns and tears down all of it)
//! ```
//!
//! The surrounding UI is a thin host: it supplies job/resume text,
//! pushes captured frames into the tracks, flips the visibility flag,
//! and receives the [`SessionArtifact`] from [`InterviewSession::end`].
//! All remote intelligence is reached through injected seams
//! ([`InterviewAgent`], [`VisionOracle`], [`SpeechSynthesizer`]) so a
//! test harness can script every collaborator.

pub mod audio;
pub mod config;
pub mod error;
pub mod live;
pub mod media;
pub mod proctor;
pub mod recorder;
pub mod session;
pub mod speech;
pub mod transcript;

pub use audio::{AudioSink, NullSink, PlaybackClock, RodioSink};
pub use config::{ProctorConfig, SessionConfig};
pub use error::SessionError;
pub use live::{GeminiInterviewAgent, InterviewAgent, LiveClient, LiveEvent, LiveState};
pub use media::{MediaBackend, MediaStreamPair, MicrophoneTrack, VideoFrame, VideoTrack};
pub use proctor::{
    FrameAnalysis, FrameKind, GeminiVisionOracle, ProctorMonitor, ProctorSignal, Visibility,
    VisionOracle,
};
pub use recorder::{MediaEncoder, SessionRecorder, WavEncoder};
pub use session::{
    AiStatus, InterviewSession, ProctorIssues, SessionArtifact, SessionDeps, SessionState,
};
pub use speech::{LoggingSpeech, SpeechSynthesizer};
pub use transcript::{Speaker, TranscriptEntry, TranscriptLog};
