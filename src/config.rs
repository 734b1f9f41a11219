//! Session configuration.
//!
//! The host screen supplies the job description and resume text; the
//! rest of the knobs default to the values the interview product ships
//! with. The interviewer persona is baked in here and combined with the
//! per-candidate context into the streaming session's system
//! instruction.

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────

/// Default streaming interview-agent model.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default vision-analysis model for proctoring frame checks.
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.5-flash";

/// Interviewer persona prepended to every session's system instruction.
pub const INTERVIEWER_PERSONA: &str = "\
You are Alex, a friendly, professional and highly intelligent AI interviewer. \
Conduct a structured, real-time spoken interview to assess the candidate's \
suitability for the role, strictly following this flow: \
(1) ask the candidate to introduce themselves in detail; \
(2) discuss their technical skills and fit for the job; \
(3) verbally present a Python coding challenge and ask them to solve it in \
the provided editor while explaining their approach; offer hints when they \
are stuck, but politely decline to give the solution; \
(4) discuss past projects from their resume; \
(5) ask about salary expectations; \
(6) assess communication skills continuously throughout. \
When the salary section is complete, thank the candidate, explain the next \
steps and conclude. The entire interview is conducted in English; if the \
candidate speaks another language, gently remind them to continue in English.";

// ── Proctoring tunables ────────────────────────────────────────────

/// Tunables for the proctoring monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorConfig {
    /// Milliseconds between webcam/screen frame analyses.
    pub visual_interval_ms: u64,
    /// Milliseconds between microphone energy checks.
    pub audio_interval_ms: u64,
    /// Background-noise threshold on the 0–255 analyser scale.
    pub noise_threshold: f32,
    /// JPEG quality (1–100) for sampled frames sent to the oracle.
    pub jpeg_quality: u8,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            visual_interval_ms: 15_000,
            audio_interval_ms: 2_000,
            noise_threshold: 35.0,
            jpeg_quality: 70,
        }
    }
}

// ── Session configuration ──────────────────────────────────────────

/// Configuration for one live interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Job description text supplied by the host screen.
    pub job_description: String,
    /// Candidate resume text supplied by the host screen.
    pub resume_text: String,
    /// API key for the remote interview-agent service.
    pub api_key: String,
    /// Streaming model identifier.
    pub live_model: String,
    /// Vision-analysis model identifier.
    pub vision_model: String,
    /// Number of confirmed cheating violations that terminates the
    /// session. The first violation below this limit only shows a
    /// transient warning.
    pub warning_limit: u32,
    /// Milliseconds the transient cheating warning stays visible.
    pub warning_dismiss_ms: u64,
    /// Milliseconds of transcription silence before the agent status
    /// flips from Listening to Thinking.
    pub silence_timeout_ms: u64,
    /// Proctoring tunables.
    pub proctor: ProctorConfig,
}

impl SessionConfig {
    /// Build a config for the given candidate context with default knobs.
    pub fn new(job_description: String, resume_text: String, api_key: String) -> Self {
        Self {
            job_description,
            resume_text,
            api_key,
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            warning_limit: 2,
            warning_dismiss_ms: 5_000,
            silence_timeout_ms: 1_500,
            proctor: ProctorConfig::default(),
        }
    }

    /// Assemble the system instruction for the streaming session:
    /// persona plus the per-candidate job/resume context.
    pub fn build_system_instruction(&self) -> String {
        format!(
            "{INTERVIEWER_PERSONA}\n\n---JOB DESCRIPTION---\n{}\n\n---RESUME---\n{}",
            self.job_description, self.resume_text
        )
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new(
            "Senior Rust Engineer".into(),
            "Ten years of systems programming.".into(),
            "test-key".into(),
        )
    }

    #[test]
    fn defaults() {
        let c = config();
        assert_eq!(c.warning_limit, 2);
        assert_eq!(c.silence_timeout_ms, 1_500);
        assert_eq!(c.proctor.visual_interval_ms, 15_000);
        assert_eq!(c.proctor.audio_interval_ms, 2_000);
        assert_eq!(c.live_model, DEFAULT_LIVE_MODEL);
    }

    #[test]
    fn system_instruction_contains_context() {
        let prompt = config().build_system_instruction();
        assert!(prompt.contains("Alex"));
        assert!(prompt.contains("---JOB DESCRIPTION---"));
        assert!(prompt.contains("Senior Rust Engineer"));
        assert!(prompt.contains("---RESUME---"));
        assert!(prompt.contains("systems programming"));
    }

    #[test]
    fn persona_precedes_context() {
        let prompt = config().build_system_instruction();
        let persona_at = prompt.find("Alex").unwrap();
        let jd_at = prompt.find("---JOB DESCRIPTION---").unwrap();
        assert!(persona_at < jd_at);
    }
}
