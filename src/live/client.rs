//! Streaming session client.
//!
//! Manages one WebSocket connection to the interview agent:
//! `Idle -> Connecting -> Open -> Closed | Errored`. While open, an
//! outbound loop pushes encoded microphone frames fire-and-forget in
//! capture order, and an inbound loop parses server frames into
//! [`LiveEvent`]s. The connection is one-shot: after `Closed` or
//! `Errored` a new session requires a fresh media acquisition; there
//! is no reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::protocol::{build_audio_message, build_setup_message, parse_server_message, LIVE_WS_URL};
use super::{AgentControl, AgentSession, InterviewAgent, LiveEvent};
use crate::audio::f32_to_pcm16le;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::media::MicrophoneTrack;

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

// ── Connection state ───────────────────────────────────────────────

/// State of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    /// Not yet connected.
    Idle,
    /// WebSocket opening / waiting for setup acknowledgment.
    Connecting,
    /// Streaming.
    Open,
    /// Gracefully closed. Terminal.
    Closed,
    /// Connection failed. Terminal.
    Errored,
}

/// Outbound message for the send loop.
#[derive(Debug)]
enum Outbound {
    /// Raw PCM16LE frame to wrap and send.
    Audio(Vec<u8>),
    /// Close the connection.
    Close,
}

// ── Client ─────────────────────────────────────────────────────────

/// Handle to one streaming interview session.
pub struct LiveClient {
    outbound_tx: mpsc::Sender<Outbound>,
    state: Arc<Mutex<LiveState>>,
    session_id: String,
}

impl LiveClient {
    /// Connect, send the setup message and wait for the server's
    /// acknowledgment. Returns the client handle plus the inbound
    /// event stream.
    pub async fn connect(
        session_id: String,
        config: &SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<LiveEvent>), SessionError> {
        let url = format!("{LIVE_WS_URL}?key={}", config.api_key);

        tracing::info!(
            session_id = %session_id,
            model = %config.live_model,
            "Connecting to interview agent"
        );

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SessionError::Streaming(format!("connect failed: {e}")))?;

        let setup = build_setup_message(config);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| SessionError::Streaming(format!("setup serialization: {e}")))?;
        ws_stream
            .send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| SessionError::Streaming(format!("setup send failed: {e}")))?;

        // Wait for setupComplete before splitting the stream. The
        // server sends all messages as Binary frames (including JSON),
        // so check Binary frames starting with `{` as well as Text.
        let setup_timeout = std::time::Duration::from_secs(15);
        let setup_complete = tokio::time::timeout(setup_timeout, async {
            while let Some(msg_result) = ws_stream.next().await {
                match msg_result {
                    Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                        if let Ok(text) = std::str::from_utf8(&data) {
                            if text.contains("setupComplete") {
                                return Ok(());
                            }
                        }
                    }
                    Ok(WsMessage::Text(text)) if text.contains("setupComplete") => {
                        return Ok(());
                    }
                    Ok(WsMessage::Close(frame)) => {
                        return Err(SessionError::Streaming(format!(
                            "connection closed before setup acknowledgment: {frame:?}"
                        )));
                    }
                    Err(e) => {
                        return Err(SessionError::Streaming(format!(
                            "websocket error before setup acknowledgment: {e}"
                        )));
                    }
                    other => {
                        tracing::debug!(
                            session_id = %session_id,
                            msg = ?other,
                            "Setup phase: ignoring frame"
                        );
                    }
                }
            }
            Err(SessionError::Streaming(
                "stream ended before setup acknowledgment".to_string(),
            ))
        })
        .await;

        match setup_complete {
            Ok(Ok(())) => {
                tracing::info!(session_id = %session_id, "Interview agent ready to stream");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SessionError::Streaming(
                    "setup acknowledgment timeout (15s)".to_string(),
                ))
            }
        }

        let (ws_sender, ws_receiver) = ws_stream.split();
        let state = Arc::new(Mutex::new(LiveState::Open));

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(256);
        let (event_tx, event_rx) = mpsc::channel::<LiveEvent>(256);

        let state_out = Arc::clone(&state);
        let sid_out = session_id.clone();
        tokio::spawn(async move {
            Self::outbound_loop(outbound_rx, ws_sender, state_out, sid_out).await;
        });

        let state_in = Arc::clone(&state);
        let sid_in = session_id.clone();
        tokio::spawn(async move {
            Self::inbound_loop(ws_receiver, event_tx, state_in, sid_in).await;
        });

        Ok((
            Self {
                outbound_tx,
                state,
                session_id,
            },
            event_rx,
        ))
    }

    /// Attach the continuous audio producer: reads microphone frames,
    /// substitutes silence while the track is muted (the stream stays
    /// open), and pushes encoded frames fire-and-forget.
    pub fn attach_microphone(&self, track: MicrophoneTrack) -> tokio::task::JoinHandle<()> {
        let tx = self.outbound_tx.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            let mut frames = track.subscribe();
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        let frame = track.transport_frame(frame);
                        if tx.send(Outbound::Audio(f32_to_pcm16le(&frame))).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            session_id = %session_id,
                            skipped,
                            "Audio producer lagged; frames dropped"
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(session_id = %session_id, "Audio producer stopped");
        })
    }

    /// Send one raw PCM16LE frame.
    pub async fn send_audio(&self, pcm_data: &[u8]) -> Result<(), SessionError> {
        if pcm_data.is_empty() {
            return Ok(());
        }
        self.outbound_tx
            .send(Outbound::Audio(pcm_data.to_vec()))
            .await
            .map_err(|_| SessionError::Streaming("audio channel closed".to_string()))
    }

    /// Close the session gracefully. The connection cannot be reopened.
    pub async fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close).await;
    }

    /// Current connection state.
    pub async fn state(&self) -> LiveState {
        *self.state.lock().await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // ── Internal loops ────────────────────────────────────────────

    async fn outbound_loop(
        mut rx: mpsc::Receiver<Outbound>,
        mut ws_sender: WsSink,
        state: Arc<Mutex<LiveState>>,
        session_id: String,
    ) {
        let mut chunk_count: u64 = 0;

        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Audio(pcm) => {
                    chunk_count += 1;
                    let audio_msg = build_audio_message(&pcm);
                    let json = match serde_json::to_string(&audio_msg) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(
                                session_id = %session_id,
                                error = %e,
                                "Failed to serialize audio message"
                            );
                            continue;
                        }
                    };
                    if chunk_count == 1 || chunk_count % 100 == 0 {
                        tracing::debug!(
                            session_id = %session_id,
                            chunk = chunk_count,
                            pcm_bytes = pcm.len(),
                            "Sending audio chunk"
                        );
                    }
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        tracing::warn!(
                            session_id = %session_id,
                            "WebSocket send failed, closing outbound loop"
                        );
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    let mut state = state.lock().await;
                    if *state != LiveState::Errored {
                        *state = LiveState::Closed;
                    }
                    break;
                }
            }
        }

        tracing::debug!(session_id = %session_id, "Outbound loop terminated");
    }

    async fn inbound_loop(
        mut ws_receiver: WsStream,
        event_tx: mpsc::Sender<LiveEvent>,
        state: Arc<Mutex<LiveState>>,
        session_id: String,
    ) {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(WsMessage::Text(text)) => {
                    if !Self::dispatch(&text, &event_tx, &session_id).await {
                        return;
                    }
                }
                Ok(WsMessage::Binary(data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    // All server messages arrive as JSON-in-Binary; a
                    // non-JSON binary frame is unexpected, skip it.
                    if data.first() == Some(&b'{') {
                        if let Ok(text) = std::str::from_utf8(&data) {
                            if !Self::dispatch(text, &event_tx, &session_id).await {
                                return;
                            }
                            continue;
                        }
                    }
                    tracing::warn!(
                        session_id = %session_id,
                        len = data.len(),
                        "Unexpected non-JSON binary frame, skipping"
                    );
                }
                Ok(WsMessage::Close(frame)) => {
                    tracing::info!(session_id = %session_id, close_frame = ?frame, "Session closed by server");
                    *state.lock().await = LiveState::Closed;
                    break;
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                    // Handled by the transport.
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        "Streaming session transport error"
                    );
                    *state.lock().await = LiveState::Errored;
                    let _ = event_tx
                        .send(LiveEvent::Error {
                            message: format!("websocket error: {e}"),
                        })
                        .await;
                    break;
                }
            }
        }

        tracing::debug!(session_id = %session_id, "Inbound loop terminated");
    }

    /// Parse one server frame and forward its events. Returns false if
    /// the event receiver is gone and the loop should stop.
    async fn dispatch(text: &str, event_tx: &mpsc::Sender<LiveEvent>, session_id: &str) -> bool {
        for event in parse_server_message(text) {
            match &event {
                LiveEvent::InputTranscript { text } => {
                    tracing::debug!(session_id = %session_id, text = %text, "Candidate transcript fragment");
                }
                LiveEvent::OutputTranscript { text } => {
                    tracing::debug!(session_id = %session_id, text = %text, "Agent transcript fragment");
                }
                LiveEvent::Audio { data } => {
                    tracing::trace!(session_id = %session_id, bytes = data.len(), "Agent audio chunk");
                }
                LiveEvent::TurnComplete => {
                    tracing::debug!(session_id = %session_id, "Turn complete");
                }
                _ => {}
            }
            if event_tx.send(event).await.is_err() {
                tracing::debug!(
                    session_id = %session_id,
                    "Event receiver dropped, closing inbound loop"
                );
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl AgentControl for LiveClient {
    async fn close(&self) {
        LiveClient::close(self).await;
    }
}

// ── Default agent implementation ───────────────────────────────────

/// Opens streaming sessions against the real remote service.
#[derive(Debug, Default)]
pub struct GeminiInterviewAgent;

#[async_trait]
impl InterviewAgent for GeminiInterviewAgent {
    async fn open(
        &self,
        session_id: &str,
        config: &SessionConfig,
        microphone: MicrophoneTrack,
    ) -> Result<AgentSession, SessionError> {
        let (client, events) = LiveClient::connect(session_id.to_string(), config).await?;
        let client = Arc::new(client);
        let producer = client.attach_microphone(microphone);
        Ok(AgentSession {
            events,
            control: client,
            tasks: vec![producer],
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_state_terminal_variants_are_distinct() {
        assert_ne!(LiveState::Closed, LiveState::Errored);
        assert_ne!(LiveState::Idle, LiveState::Open);
        assert_ne!(LiveState::Connecting, LiveState::Open);
    }

    #[tokio::test]
    async fn connect_to_unreachable_endpoint_is_streaming_error() {
        // Nothing listens on this port; connect must fail cleanly with
        // the streaming variant, not a panic.
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            connect_to("ws://127.0.0.1:9/session"),
        )
        .await;
        match result {
            Ok(Err(SessionError::Streaming(_))) => {}
            Ok(other) => panic!("expected streaming error, got {other:?}"),
            Err(_) => panic!("connect did not fail promptly"),
        }
    }

    async fn connect_to(url: &str) -> Result<(), SessionError> {
        tokio_tungstenite::connect_async(url)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Streaming(format!("connect failed: {e}")))
    }
}
