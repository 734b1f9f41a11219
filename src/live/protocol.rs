//! Wire schema for the streaming interview session.
//!
//! JSON message builders for the outbound direction (setup, realtime
//! audio input) and the parser for inbound server messages. Field
//! names follow the remote service's camelCase wire format.

use base64::Engine;
use serde::Serialize;

use super::LiveEvent;
use crate::config::SessionConfig;

// ── Constants ──────────────────────────────────────────────────────

/// Streaming endpoint for the interview agent.
pub const LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// MIME type for outbound microphone audio (16 kHz PCM mono).
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ── Setup message (first frame after connect) ──────────────────────

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: SystemInstruction,
    /// Requests speech-to-text of the candidate's audio.
    #[serde(rename = "inputAudioTranscription")]
    pub input_audio_transcription: TranscriptionConfig,
    /// Requests text form of the agent's spoken replies.
    #[serde(rename = "outputAudioTranscription")]
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes to `{}`; presence of the field enables transcription.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

/// Build the setup message for an interview session.
pub fn build_setup_message(config: &SessionConfig) -> SetupMessage {
    SetupMessage {
        setup: SetupPayload {
            model: format!("models/{}", config.live_model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: config.build_system_instruction(),
                }],
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        },
    }
}

// ── Audio input message ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

/// Audio chunk with MIME type and base64-encoded data.
#[derive(Debug, Serialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String, // base64-encoded PCM16LE
}

/// Wrap one raw PCM frame for transport.
///
/// Wire format:
/// `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
pub fn build_audio_message(pcm_data: &[u8]) -> RealtimeInputMessage {
    let b64 = base64::engine::general_purpose::STANDARD.encode(pcm_data);
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data: b64,
            }],
        },
    }
}

// ── Server message parsing ─────────────────────────────────────────

/// Parse one JSON frame from the server into a list of events.
///
/// A single server message can carry multiple events (audio chunks and
/// a transcription fragment in the same frame).
pub fn parse_server_message(json_text: &str) -> Vec<LiveEvent> {
    let mut events = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            events.push(LiveEvent::Error {
                message: format!("Failed to parse server message: {e}"),
            });
            return events;
        }
    };

    if value.get("setupComplete").is_some() {
        events.push(LiveEvent::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        // Candidate speech-to-text fragment
        if let Some(text) = content
            .pointer("/inputTranscription/text")
            .and_then(|v| v.as_str())
        {
            if !text.is_empty() {
                events.push(LiveEvent::InputTranscript {
                    text: text.to_string(),
                });
            }
        }
        // Agent reply transcription fragment
        if let Some(text) = content
            .pointer("/outputTranscription/text")
            .and_then(|v| v.as_str())
        {
            if !text.is_empty() {
                events.push(LiveEvent::OutputTranscript {
                    text: text.to_string(),
                });
            }
        }
        // Synthesized agent speech
        if let Some(parts) = content
            .pointer("/modelTurn/parts")
            .and_then(|v| v.as_array())
        {
            for part in parts {
                if let Some(data_b64) = part
                    .pointer("/inlineData/data")
                    .and_then(|v| v.as_str())
                {
                    if let Ok(audio_bytes) =
                        base64::engine::general_purpose::STANDARD.decode(data_b64)
                    {
                        events.push(LiveEvent::Audio { data: audio_bytes });
                    }
                }
            }
        }
        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(LiveEvent::Interrupted);
        }
        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            events.push(LiveEvent::TurnComplete);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown server error");
        events.push(LiveEvent::Error {
            message: message.to_string(),
        });
    }

    events
}

// ── Tests ──────────────────────────────────────────────────────────
