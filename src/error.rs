//! Error taxonomy for interview sessions.
//!
//! Most component failures are absorbed at the component boundary and
//! converted into a safe default (empty artifact, "no violation this
//! tick") instead of propagating. The variants here cover the cases a
//! caller can actually observe through the public API.

use thiserror::Error;

/// Errors surfaced by the interview session orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Camera/microphone or screen-share acquisition was denied or
    /// unavailable. Fatal to session start; no partial session exists.
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    /// The streaming session to the interview agent failed. Non-fatal
    /// mid-session (the session continues degraded); fatal only when
    /// the caller explicitly asked for a connection.
    #[error("streaming session error: {0}")]
    Streaming(String),

    /// A discrete oracle call (frame analysis) failed. Callers treat
    /// this as "no signal this tick".
    #[error("oracle call failed: {0}")]
    Oracle(String),

    /// Recording could not be produced. Session end still succeeds
    /// with an empty recording artifact.
    #[error("recording failed: {0}")]
    Recording(String),

    /// A wire payload could not be encoded or decoded.
    #[error("audio codec error: {0}")]
    Codec(String),

    /// The session was already terminated or ended; the lifecycle
    /// operation has no effect.
    #[error("session already closed")]
    AlreadyClosed,
}
