//! Streaming session with the remote interview agent.
//!
//! ## Protocol overview
//!
//! ```text
//! 1. Connect — open WebSocket to the live endpoint
//! 2. Setup   — send configuration (model, system instruction,
//!              AUDIO modality, both-direction transcription)
//! 3. Stream  — push encoded microphone frames as realtimeInput,
//!              receive transcription fragments + synthesized speech
//! 4. Close   — one-shot; a closed session is never reopened
//! ```
//!
//! The remote service sends all messages as WebSocket Binary frames,
//! including JSON control messages; the client detects JSON in Binary
//! frames (content starting with `{`) and parses them as server
//! messages.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::media::MicrophoneTrack;

pub mod client;
pub mod protocol;

pub use client::{GeminiInterviewAgent, LiveClient, LiveState};

// ── Shared event type ──────────────────────────────────────────────

/// Inbound event from the interview agent's streaming session.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Session setup acknowledged; ready to stream.
    SetupComplete,
    /// Synthesized agent speech chunk (PCM16, 24 kHz mono).
    Audio { data: Vec<u8> },
    /// Incremental transcription of the candidate's speech.
    InputTranscript { text: String },
    /// Incremental transcription of the agent's spoken reply.
    OutputTranscript { text: String },
    /// The agent finished a response turn.
    TurnComplete,
    /// The agent was interrupted mid-response by candidate speech.
    Interrupted,
    /// Error from the remote service or transport.
    Error { message: String },
}

// ── Agent seam ─────────────────────────────────────────────────────

/// Handle to one open streaming connection.
pub struct AgentSession {
    /// Inbound event stream.
    pub events: mpsc::Receiver<LiveEvent>,
    /// Close control for teardown.
    pub control: Arc<dyn AgentControl>,
    /// Background tasks owned by this connection (audio producer,
    /// pump loops); aborted by the session's resource disposal.
    pub tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Teardown control over an open connection.
#[async_trait]
pub trait AgentControl: Send + Sync {
    /// Close the stream and stop sending. Idempotent.
    async fn close(&self);
}

/// Opens streaming sessions with the interview agent.
///
/// Injected into the orchestrator so tests can substitute a scripted
/// agent for the remote service.
#[async_trait]
pub trait InterviewAgent: Send + Sync {
    async fn open(
        &self,
        session_id: &str,
        config: &SessionConfig,
        microphone: MicrophoneTrack,
    ) -> Result<AgentSession, SessionError>;
}
