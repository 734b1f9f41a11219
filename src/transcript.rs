//! Transcript aggregation.
//!
//! The streaming session delivers transcription as partial word
//! fragments, alternating between the candidate's speech-to-text and
//! the agent's spoken-reply text. [`TranscriptLog`] is a pure reducer
//! over those fragments: consecutive fragments from the same speaker
//! merge into one entry so the final transcript reads as coherent
//! sentences, and each entry is stamped with the playback-clock time at
//! which it began.

use serde::{Deserialize, Serialize};

// ── Types ──────────────────────────────────────────────────────────

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The AI interviewer.
    Agent,
    /// The interviewee.
    Candidate,
}

/// One finalized or in-progress utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    /// Utterance text; append-only while the turn is in progress.
    pub text: String,
    /// Seconds into the recording at which the entry became active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f32>,
}

// ── Log ────────────────────────────────────────────────────────────

/// Ordered, append-only transcript of a session.
///
/// Reduction rule: a fragment whose speaker matches the last entry's
/// speaker (and no turn boundary intervened) appends to that entry;
/// anything else starts a new entry. Entries are never reordered or
/// merged non-adjacently.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
    /// Set by a turn-complete signal; the next fragment starts a fresh
    /// entry even if the speaker repeats.
    turn_boundary: bool,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one incremental fragment at the given playback-clock time.
    pub fn apply_fragment(&mut self, speaker: Speaker, fragment: &str, at_secs: f32) {
        if !self.turn_boundary {
            if let Some(last) = self.entries.last_mut() {
                if last.speaker == speaker {
                    last.text.push_str(fragment);
                    return;
                }
            }
        }
        self.turn_boundary = false;
        self.entries.push(TranscriptEntry {
            speaker,
            text: fragment.to_string(),
            timestamp: Some(at_secs),
        });
    }

    /// Mark a turn boundary: the current entry is finalized and the
    /// next fragment opens a new one regardless of speaker.
    pub fn turn_complete(&mut self) {
        self.turn_boundary = true;
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the log, yielding the ordered entries for the artifact.
    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_speaker_fragments_merge() {
        let mut log = TranscriptLog::new();
        log.apply_fragment(Speaker::Candidate, "He", 0.5);
        log.apply_fragment(Speaker::Candidate, "llo", 0.7);
        log.apply_fragment(Speaker::Agent, "Hi", 1.2);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::Candidate);
        assert_eq!(entries[0].text, "Hello");
        assert_eq!(entries[1].speaker, Speaker::Agent);
        assert_eq!(entries[1].text, "Hi");
    }

    #[test]
    fn timestamp_frozen_at_first_fragment() {
        let mut log = TranscriptLog::new();
        log.apply_fragment(Speaker::Candidate, "I have", 3.0);
        log.apply_fragment(Speaker::Candidate, " 5 years", 4.5);

        assert_eq!(log.entries()[0].timestamp, Some(3.0));
    }

    #[test]
    fn speaker_change_starts_new_entry() {
        let mut log = TranscriptLog::new();
        log.apply_fragment(Speaker::Agent, "Tell me", 0.0);
        log.apply_fragment(Speaker::Candidate, "Sure", 2.0);
        log.apply_fragment(Speaker::Agent, "Go on", 5.0);

        assert_eq!(log.len(), 3);
    }

    #[test]
    fn turn_complete_splits_same_speaker_turns() {
        let mut log = TranscriptLog::new();
        log.apply_fragment(Speaker::Agent, "First question.", 0.0);
        log.turn_complete();
        log.apply_fragment(Speaker::Agent, "Second question.", 10.0);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "First question.");
        assert_eq!(entries[1].text, "Second question.");
        assert_eq!(entries[1].timestamp, Some(10.0));
    }

    #[test]
    fn merge_resumes_after_boundary_entry() {
        let mut log = TranscriptLog::new();
        log.turn_complete();
        log.apply_fragment(Speaker::Candidate, "I ", 1.0);
        log.apply_fragment(Speaker::Candidate, "agree", 1.1);

        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].text, "I agree");
    }

    #[test]
    fn empty_log() {
        let log = TranscriptLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn into_entries_preserves_order() {
        let mut log = TranscriptLog::new();
        log.apply_fragment(Speaker::Agent, "One", 0.0);
        log.apply_fragment(Speaker::Candidate, "Two", 1.0);
        let entries = log.into_entries();
        assert_eq!(entries[0].text, "One");
        assert_eq!(entries[1].text, "Two");
    }

    #[test]
    fn speaker_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Speaker::Agent).unwrap(), "\"agent\"");
        assert_eq!(
            serde_json::to_string(&Speaker::Candidate).unwrap(),
            "\"candidate\""
        );
    }
}
