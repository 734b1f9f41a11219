//! Vision-analysis oracle for proctoring frame checks.
//!
//! One discrete request per sampled frame: the frame goes up as a
//! base64 JPEG, the oracle returns a fixed-shape JSON judgment. The
//! oracle is injected behind [`VisionOracle`] so tests (and the state
//! machine's tests) can script results without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::media::VideoFrame;

// ── Result shape ───────────────────────────────────────────────────

/// Structured judgment for one analyzed frame.
///
/// The wire shape is fixed; unknown or omitted fields default to "no
/// issue" so a partial response never raises a false violation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    #[serde(default)]
    pub cheating_detected: bool,
    #[serde(default)]
    pub cheating_reason: String,
    #[serde(default)]
    pub candidate_absent: bool,
    #[serde(default)]
    pub eye_contact_deviation: bool,
    #[serde(default)]
    pub video_quality_issue: bool,
    #[serde(default)]
    pub video_quality_reason: String,
}

/// Which stream a sampled frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Webcam,
    Screen,
}

// ── Oracle seam ────────────────────────────────────────────────────

/// Analyzes a single frame for policy violations and quality issues.
#[async_trait]
pub trait VisionOracle: Send + Sync {
    async fn analyze_frame(
        &self,
        jpeg_base64: &str,
        kind: FrameKind,
    ) -> Result<FrameAnalysis, SessionError>;
}

// ── Frame compression ──────────────────────────────────────────────

/// Compress a raw RGB frame to a base64 JPEG for submission.
pub fn encode_frame_jpeg(frame: &VideoFrame, quality: u8) -> Result<String, SessionError> {
    use base64::Engine;
    use image::ImageEncoder;

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .write_image(
            &frame.rgb,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| SessionError::Oracle(format!("jpeg encode failed: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

// ── Remote oracle implementation ───────────────────────────────────

const WEBCAM_PROMPT: &str = "\
You are an AI proctor for an online job interview. Analyze this single \
webcam frame for policy violations and quality issues. Check: \
(1) cheating: is the candidate holding, looking at or interacting with a \
mobile phone or any secondary device? Be strict; if detected set \
cheating_detected true and cheating_reason to \"Mobile phone usage\". \
(2) presence: is a person clearly visible, sitting upright and facing the \
camera? If not, set candidate_absent true. \
(3) eye contact: is the candidate's gaze clearly deviated away from the \
screen for an extended period, suggesting they are reading answers? Only \
flag the obvious case. \
(4) video quality: is the image too dark, blurry or pixelated to see the \
candidate? If so, set video_quality_issue true with a video_quality_reason. \
Respond ONLY with a JSON object matching the schema; with no issues, set \
all booleans false and reasons to \"None\".";

const SCREEN_PROMPT: &str = "\
You are an AI proctor for an online job interview. Analyze this single \
screen-share frame for potential cheating: does the screen show any \
application, website or document other than the interview platform itself \
(video feeds, a transcript and a simple code editor are allowed)? Respond \
ONLY with a JSON object matching the schema; if nothing suspicious is \
visible, set cheating_detected false and reasons to \"None\". Always set \
candidate_absent false for screen-share frames.";

/// Remote vision oracle over the generative-AI REST API.
pub struct GeminiVisionOracle {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiVisionOracle {
    /// Create an oracle client against the production endpoint.
    pub fn new(api_key: String, model: String) -> Result<Self, SessionError> {
        Self::with_base_url(
            api_key,
            model,
            "https://generativelanguage.googleapis.com".to_string(),
        )
    }

    /// Create an oracle client against a custom endpoint (tests).
    pub fn with_base_url(
        api_key: String,
        model: String,
        base_url: String,
    ) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SessionError::Oracle(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url,
        })
    }

    fn request_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "cheating_detected": { "type": "BOOLEAN" },
                "cheating_reason": { "type": "STRING" },
                "candidate_absent": { "type": "BOOLEAN" },
                "eye_contact_deviation": { "type": "BOOLEAN" },
                "video_quality_issue": { "type": "BOOLEAN" },
                "video_quality_reason": { "type": "STRING" }
            },
            "required": [
                "cheating_detected",
                "candidate_absent",
                "eye_contact_deviation",
                "video_quality_issue"
            ]
        })
    }
}

#[async_trait]
impl VisionOracle for GeminiVisionOracle {
    async fn analyze_frame(
        &self,
        jpeg_base64: &str,
        kind: FrameKind,
    ) -> Result<FrameAnalysis, SessionError> {
        let prompt = match kind {
            FrameKind::Webcam => WEBCAM_PROMPT,
            FrameKind::Screen => SCREEN_PROMPT,
        };

        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inlineData": { "mimeType": "image/jpeg", "data": jpeg_base64 } }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": Self::response_schema()
            }
        });

        let resp = self
            .http
            .post(self.request_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Oracle(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::Oracle(format!(
                "analysis request failed ({status}): {body}"
            )));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SessionError::Oracle(format!("malformed response: {e}")))?;

        let text = value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SessionError::Oracle("response carries no analysis text".into()))?;

        serde_json::from_str(text.trim())
            .map_err(|e| SessionError::Oracle(format!("malformed analysis JSON: {e}")))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
