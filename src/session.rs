//! Session state machine.
//!
//! Coordinates the live interview lifecycle:
//! `Connecting -> Active -> {Terminated | Ended}`. The session is the
//! sole owner of the media streams, the streaming connection, the
//! proctoring monitor and the recorder; every collaborator is injected
//! so tests can substitute scripted implementations.
//!
//! ```text
//! MediaBackend ─▸ MediaStreamPair ─┬─▸ InterviewAgent ─▸ event pump ─▸ transcript / playback
//!                                  ├─▸ ProctorMonitor ─▸ signal loop ─▸ warnings / termination
//!                                  └─▸ SessionRecorder ─▸ recording artifact
//! ```
//!
//! Teardown discipline: every exit path funnels through the one
//! resource bag, and the graceful path stops and drains the recorder
//! strictly before the media tracks are released, otherwise the final
//! chunk is lost.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::audio::{pcm16le_to_f32, AudioSink, PlaybackClock, OUTPUT_SAMPLE_RATE};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::live::{AgentControl, InterviewAgent, LiveEvent};
use crate::media::{MediaBackend, MediaStreamPair, MicrophoneTrack};
use crate::proctor::{ProctorDeps, ProctorMonitor, ProctorSignal, Visibility, VisionOracle};
use crate::recorder::{MediaEncoder, SessionRecorder};
use crate::speech::SpeechSynthesizer;
use crate::transcript::{Speaker, TranscriptEntry, TranscriptLog};

// ── Public state types ─────────────────────────────────────────────

/// Lifecycle state of an interview session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Media and streaming setup in progress.
    Connecting,
    /// Normal operation.
    Active,
    /// Forcibly ended after repeated violations. Absorbing: the only
    /// exit is a full restart by the host.
    Terminated,
    /// Gracefully ended; the artifact has been handed out.
    Ended,
}

/// Derived status of the interview agent, for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiStatus {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

/// Current level-triggered proctoring display state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProctorIssues {
    pub gaze_deviation: bool,
    pub video_quality: Option<String>,
    pub background_noise: bool,
}

/// Everything a session hands back when it ends gracefully.
#[derive(Debug, Clone)]
pub struct SessionArtifact {
    /// Time-ordered transcript entries.
    pub transcript: Vec<TranscriptEntry>,
    /// Whatever the candidate left in the code editor.
    pub code_submission: String,
    /// Recording as a `data:` URL, or empty if recording was
    /// unavailable.
    pub recording_data: String,
}

/// Injected collaborators for a session.
pub struct SessionDeps {
    pub media: Arc<dyn MediaBackend>,
    pub agent: Arc<dyn InterviewAgent>,
    pub oracle: Arc<dyn VisionOracle>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<dyn AudioSink>,
    pub encoder: Box<dyn MediaEncoder + Send>,
}

// ── Shared observable state ────────────────────────────────────────

struct Shared {
    state: watch::Sender<SessionState>,
    ai_status: watch::Sender<AiStatus>,
    issues: watch::Sender<ProctorIssues>,
    cheating_warning: watch::Sender<bool>,
    absence_warning: watch::Sender<bool>,
    warning_count: AtomicU32,
    question_count: AtomicU32,
    transcript: parking_lot::Mutex<TranscriptLog>,
    code: parking_lot::Mutex<String>,
    started_at: tokio::time::Instant,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::channel(SessionState::Connecting).0,
            ai_status: watch::channel(AiStatus::Thinking).0,
            issues: watch::channel(ProctorIssues::default()).0,
            cheating_warning: watch::channel(false).0,
            absence_warning: watch::channel(false).0,
            warning_count: AtomicU32::new(0),
            question_count: AtomicU32::new(1),
            transcript: parking_lot::Mutex::new(TranscriptLog::new()),
            code: parking_lot::Mutex::new(String::new()),
            started_at: tokio::time::Instant::now(),
        }
    }

    fn elapsed_secs(&self) -> f32 {
        self.started_at.elapsed().as_secs_f32()
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_ai_status(&self, status: AiStatus) {
        self.ai_status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

// ── Resource bag ───────────────────────────────────────────────────

struct Resources {
    pair: MediaStreamPair,
    recorder: SessionRecorder,
    agent_control: Option<Arc<dyn AgentControl>>,
    proctor: ProctorMonitor,
    /// Event pump plus the agent connection's own tasks.
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Single owner of everything that must be torn down. `take()` is the
/// idempotence point: whichever exit path gets the resources disposes
/// them; every later path sees an empty bag and does nothing.
struct ResourceBag {
    inner: parking_lot::Mutex<Option<Resources>>,
}

impl ResourceBag {
    fn new(resources: Resources) -> Self {
        Self {
            inner: parking_lot::Mutex::new(Some(resources)),
        }
    }

    fn take(&self) -> Option<Resources> {
        self.inner.lock().take()
    }
}

/// Tear everything down immediately, without producing an artifact.
async fn dispose_abrupt(bag: &ResourceBag, sink: &Arc<dyn AudioSink>) {
    let Some(mut resources) = bag.take() else {
        return;
    };
    for task in resources.tasks.drain(..) {
        task.abort();
    }
    if let Some(control) = resources.agent_control.take() {
        control.close().await;
    }
    sink.stop_all();
    resources.proctor.shutdown();
    resources.recorder.discard();
    resources.pair.release();
}

// ── Session ────────────────────────────────────────────────────────

/// One live interview session.
pub struct InterviewSession {
    id: String,
    shared: Arc<Shared>,
    bag: Arc<ResourceBag>,
    sink: Arc<dyn AudioSink>,
    microphone: MicrophoneTrack,
    camera: crate::media::VideoTrack,
    screen: crate::media::VideoTrack,
    visibility: Visibility,
}

impl InterviewSession {
    /// Acquire media, start recording, open the streaming session and
    /// the proctoring monitor, and enter `Active`.
    ///
    /// Media permission failure is the only error surfaced here; a
    /// failed streaming connection logs and leaves the session in
    /// degraded mode (no transcript or agent audio) per the fail-open
    /// policy.
    pub async fn start(
        config: SessionConfig,
        deps: SessionDeps,
    ) -> Result<Self, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let shared = Arc::new(Shared::new());

        tracing::info!(session_id = %id, "Starting interview session");

        // (1) Media first: a denial means no session at all.
        let pair = deps.media.acquire().await?;
        let microphone = pair.camera.microphone.clone();
        let camera = pair.camera.video.clone();
        let screen = pair.screen.video.clone();

        // (2) Recording starts on capture success, not on the remote
        // session opening, so early agent speech is captured too.
        let recorder = SessionRecorder::start(&microphone, deps.encoder);

        // (3) Streaming session; failure degrades rather than aborts.
        let mut agent_control: Option<Arc<dyn AgentControl>> = None;
        let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();
        match deps.agent.open(&id, &config, microphone.clone()).await {
            Ok(agent_session) => {
                agent_control = Some(agent_session.control);
                tasks.extend(agent_session.tasks);
                tasks.push(tokio::spawn(event_pump(
                    agent_session.events,
                    Arc::clone(&shared),
                    Arc::clone(&deps.sink),
                    Duration::from_millis(config.silence_timeout_ms),
                )));
            }
            Err(e) => {
                tracing::error!(
                    session_id = %id,
                    error = %e,
                    "Interview agent unavailable; session continues degraded"
                );
            }
        }

        // (4) Proctoring timers.
        let visibility = Visibility::new();
        let (signal_tx, signal_rx) = mpsc::channel::<ProctorSignal>(64);
        let proctor = ProctorMonitor::start(
            config.proctor.clone(),
            ProctorDeps {
                oracle: deps.oracle,
                speech: deps.speech,
                camera: pair.camera.video.clone(),
                screen: pair.screen.video.clone(),
                microphone: microphone.clone(),
                visibility: visibility.clone(),
                signals: signal_tx,
            },
        );

        let bag = Arc::new(ResourceBag::new(Resources {
            pair,
            recorder,
            agent_control,
            proctor,
            tasks,
        }));

        // The signal loop is not in the bag: it must survive long
        // enough to run termination teardown, and it exits by itself
        // once the proctor's senders drop.
        tokio::spawn(signal_loop(
            signal_rx,
            Arc::clone(&shared),
            Arc::clone(&bag),
            Arc::clone(&deps.sink),
            config.warning_limit,
            config.warning_dismiss_ms,
        ));

        shared.state.send_replace(SessionState::Active);
        tracing::info!(session_id = %id, "Session active");

        Ok(Self {
            id,
            shared,
            bag,
            sink: deps.sink,
            microphone,
            camera,
            screen,
            visibility,
        })
    }

    /// End the session gracefully and hand back the artifact.
    ///
    /// Teardown order matters: the recorder is stopped and drained
    /// before the media tracks are released, then the streaming
    /// session, proctoring timers and media go down in that order.
    pub async fn end(&self) -> Result<SessionArtifact, SessionError> {
        let Some(mut resources) = self.bag.take() else {
            return Err(SessionError::AlreadyClosed);
        };
        tracing::info!(session_id = %self.id, "Ending session");

        // (1) Recorder first: its final chunk needs live tracks.
        let recording_data = resources.recorder.stop().await;

        // (2) Streaming session and in-flight playback.
        if let Some(control) = resources.agent_control.take() {
            control.close().await;
        }
        self.sink.stop_all();
        for task in resources.tasks.drain(..) {
            task.abort();
        }

        // (3) Proctoring timers.
        resources.proctor.shutdown();

        // (4) Media tracks.
        resources.pair.release();

        self.shared.state.send_replace(SessionState::Ended);

        // (5) Assemble the artifact, exactly once.
        let transcript = std::mem::take(&mut *self.shared.transcript.lock()).into_entries();
        let code_submission = self.shared.code.lock().clone();
        tracing::info!(
            session_id = %self.id,
            entries = transcript.len(),
            recorded = !recording_data.is_empty(),
            "Session ended"
        );
        Ok(SessionArtifact {
            transcript,
            code_submission,
            recording_data,
        })
    }

    // ── Host controls ─────────────────────────────────────────────

    /// Mute or unmute the microphone. Muting only stops sound capture
    /// for transport; the streaming session stays connected.
    pub fn set_muted(&self, muted: bool) {
        self.microphone.set_enabled(!muted);
    }

    pub fn is_muted(&self) -> bool {
        !self.microphone.is_enabled()
    }

    /// Agent speech playback volume (0.0–2.0).
    pub fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    /// Replace the candidate's code-editor contents.
    pub fn set_code_submission(&self, code: impl Into<String>) {
        *self.shared.code.lock() = code.into();
    }

    /// Foreground/background flag for the proctoring checks; the host
    /// flips this on document visibility changes.
    pub fn visibility(&self) -> Visibility {
        self.visibility.clone()
    }

    /// Webcam video track; the host's capture plumbing pushes frames
    /// here for the proctoring monitor to sample.
    pub fn camera_video(&self) -> crate::media::VideoTrack {
        self.camera.clone()
    }

    /// Screen-share video track.
    pub fn screen_video(&self) -> crate::media::VideoTrack {
        self.screen.clone()
    }

    // ── Observers ─────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.current_state()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn ai_status(&self) -> AiStatus {
        *self.shared.ai_status.borrow()
    }

    pub fn ai_status_changes(&self) -> watch::Receiver<AiStatus> {
        self.shared.ai_status.subscribe()
    }

    pub fn warning_count(&self) -> u32 {
        self.shared.warning_count.load(Ordering::SeqCst)
    }

    /// 1-based question counter, advanced on each completed turn.
    pub fn question_count(&self) -> u32 {
        self.shared.question_count.load(Ordering::SeqCst)
    }

    pub fn transcript_snapshot(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript.lock().entries().to_vec()
    }

    pub fn issues(&self) -> ProctorIssues {
        self.shared.issues.borrow().clone()
    }

    pub fn issues_changes(&self) -> watch::Receiver<ProctorIssues> {
        self.shared.issues.subscribe()
    }

    /// True while the transient first-violation warning is showing.
    pub fn cheating_warning_visible(&self) -> bool {
        *self.shared.cheating_warning.borrow()
    }

    /// True while the candidate is considered absent.
    pub fn absence_warning_active(&self) -> bool {
        *self.shared.absence_warning.borrow()
    }
}

// ── Event pump ─────────────────────────────────────────────────────

/// Consumes streaming events: transcript aggregation, AI status
/// derivation (with the idle-silence timeout), and gapless playback of
/// agent speech. If the connection drops, the pump simply exits and
/// the UI keeps whatever state it had; no reconnect.
async fn event_pump(
    mut events: mpsc::Receiver<LiveEvent>,
    shared: Arc<Shared>,
    sink: Arc<dyn AudioSink>,
    silence_timeout: Duration,
) {
    let mut playback = PlaybackClock::new();
    let mut idle_deadline: Option<tokio::time::Instant> = None;

    loop {
        let deadline = idle_deadline
            .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(86_400));
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    LiveEvent::InputTranscript { text } => {
                        shared.set_ai_status(AiStatus::Listening);
                        idle_deadline =
                            Some(tokio::time::Instant::now() + silence_timeout);
                        shared.transcript.lock().apply_fragment(
                            Speaker::Candidate,
                            &text,
                            shared.elapsed_secs(),
                        );
                    }
                    LiveEvent::OutputTranscript { text } => {
                        idle_deadline = None;
                        shared.set_ai_status(AiStatus::Speaking);
                        shared.transcript.lock().apply_fragment(
                            Speaker::Agent,
                            &text,
                            shared.elapsed_secs(),
                        );
                    }
                    LiveEvent::Audio { data } => {
                        shared.set_ai_status(AiStatus::Speaking);
                        let samples = pcm16le_to_f32(&data);
                        let duration =
                            samples.len() as f64 / OUTPUT_SAMPLE_RATE as f64;
                        let start =
                            playback.schedule(shared.elapsed_secs() as f64, duration);
                        tracing::trace!(start, duration, "Agent speech scheduled");
                        sink.enqueue(samples, OUTPUT_SAMPLE_RATE);
                    }
                    LiveEvent::TurnComplete => {
                        idle_deadline = None;
                        shared.set_ai_status(AiStatus::Idle);
                        shared.question_count.fetch_add(1, Ordering::SeqCst);
                        shared.transcript.lock().turn_complete();
                    }
                    LiveEvent::Interrupted => {
                        sink.stop_all();
                        playback.reset();
                    }
                    LiveEvent::Error { message } => {
                        // Non-fatal: the session continues degraded.
                        tracing::warn!(error = %message, "Streaming session error");
                    }
                    LiveEvent::SetupComplete => {}
                }
            }
            _ = tokio::time::sleep_until(deadline), if idle_deadline.is_some() => {
                idle_deadline = None;
                shared.set_ai_status(AiStatus::Thinking);
            }
        }
    }
    // The event stream is gone (closed or errored): whatever speech is
    // still queued must not keep playing into a dead session.
    sink.stop_all();
    tracing::debug!("Event pump stopped");
}

// ── Proctoring signal loop ─────────────────────────────────────────

/// Aggregates proctoring signals into warning/termination decisions.
/// The monitor reports cheating on every detecting tick; this loop
/// owns the count and the threshold.
async fn signal_loop(
    mut signals: mpsc::Receiver<ProctorSignal>,
    shared: Arc<Shared>,
    bag: Arc<ResourceBag>,
    sink: Arc<dyn AudioSink>,
    warning_limit: u32,
    warning_dismiss_ms: u64,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ProctorSignal::Cheating { detail } => {
                let count = shared.warning_count.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(detail = %detail, count, "Cheating violation confirmed");
                if count >= warning_limit {
                    terminate(&shared, &bag, &sink).await;
                    break;
                }
                shared.cheating_warning.send_replace(true);
                let shared_dismiss = Arc::clone(&shared);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(warning_dismiss_ms)).await;
                    if shared_dismiss.current_state() == SessionState::Active {
                        shared_dismiss.cheating_warning.send_replace(false);
                    }
                });
            }
            ProctorSignal::Absence { absent } => {
                shared.absence_warning.send_replace(absent);
            }
            ProctorSignal::Gaze { deviated } => {
                shared.issues.send_if_modified(|issues| {
                    if issues.gaze_deviation == deviated {
                        false
                    } else {
                        issues.gaze_deviation = deviated;
                        true
                    }
                });
            }
            ProctorSignal::VideoQuality { reason } => {
                shared.issues.send_if_modified(|issues| {
                    if issues.video_quality == reason {
                        false
                    } else {
                        issues.video_quality = reason;
                        true
                    }
                });
            }
            ProctorSignal::Noise { excessive } => {
                shared.issues.send_if_modified(|issues| {
                    if issues.background_noise == excessive {
                        false
                    } else {
                        issues.background_noise = excessive;
                        true
                    }
                });
            }
        }
    }
    tracing::debug!("Proctoring signal loop stopped");
}

/// Enter the absorbing `Terminated` state: resources go down
/// immediately and no artifact reaches the completion path.
async fn terminate(shared: &Arc<Shared>, bag: &ResourceBag, sink: &Arc<dyn AudioSink>) {
    if shared.current_state() != SessionState::Active {
        return;
    }
    shared.state.send_replace(SessionState::Terminated);
    tracing::warn!("Interview terminated after repeated policy violations");
    dispose_abrupt(bag, sink).await;
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use crate::live::AgentSession;
    use crate::media::VideoFrame;
    use crate::proctor::{FrameAnalysis, FrameKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    // ── Fakes ─────────────────────────────────────────────────────

    struct FakeMedia {
        deny: bool,
    }

    #[async_trait]
    impl MediaBackend for FakeMedia {
        async fn acquire(&self) -> Result<MediaStreamPair, SessionError> {
            if self.deny {
                Err(SessionError::PermissionDenied("camera denied".into()))
            } else {
                Ok(MediaStreamPair::new())
            }
        }
    }

    struct NoopControl {
        closed: AtomicBool,
    }

    #[async_trait]
    impl AgentControl for NoopControl {
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Agent whose event stream the test feeds by hand.
    struct FakeAgent {
        events: parking_lot::Mutex<Option<mpsc::Receiver<LiveEvent>>>,
        control: Arc<NoopControl>,
    }

    impl FakeAgent {
        fn new() -> (Arc<Self>, mpsc::Sender<LiveEvent>, Arc<NoopControl>) {
            let (tx, rx) = mpsc::channel(64);
            let control = Arc::new(NoopControl {
                closed: AtomicBool::new(false),
            });
            (
                Arc::new(Self {
                    events: parking_lot::Mutex::new(Some(rx)),
                    control: Arc::clone(&control),
                }),
                tx,
                control,
            )
        }
    }

    #[async_trait]
    impl InterviewAgent for FakeAgent {
        async fn open(
            &self,
            _session_id: &str,
            _config: &SessionConfig,
            _microphone: MicrophoneTrack,
        ) -> Result<AgentSession, SessionError> {
            let events = self
                .events
                .lock()
                .take()
                .ok_or_else(|| SessionError::Streaming("already opened".into()))?;
            Ok(AgentSession {
                events,
                control: Arc::clone(&self.control) as Arc<dyn AgentControl>,
                tasks: vec![],
            })
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl InterviewAgent for FailingAgent {
        async fn open(
            &self,
            _session_id: &str,
            _config: &SessionConfig,
            _microphone: MicrophoneTrack,
        ) -> Result<AgentSession, SessionError> {
            Err(SessionError::Streaming("connection refused".into()))
        }
    }

    struct ScriptedOracle {
        results: parking_lot::Mutex<VecDeque<FrameAnalysis>>,
    }

    impl ScriptedOracle {
        fn new(results: Vec<FrameAnalysis>) -> Arc<Self> {
            Arc::new(Self {
                results: parking_lot::Mutex::new(results.into()),
            })
        }

        fn quiet() -> Arc<Self> {
            Self::new(vec![])
        }
    }

    #[async_trait]
    impl VisionOracle for ScriptedOracle {
        async fn analyze_frame(
            &self,
            _jpeg_base64: &str,
            _kind: FrameKind,
        ) -> Result<FrameAnalysis, SessionError> {
            self.results
                .lock()
                .pop_front()
                .ok_or_else(|| SessionError::Oracle("script exhausted".into()))
        }
    }

    struct SilentSpeech;

    #[async_trait]
    impl SpeechSynthesizer for SilentSpeech {
        async fn speak(&self, _text: &str) {}
    }

    /// Encoder that records whether the microphone was already stopped
    /// when the final chunk was drained.
    struct OrderProbeEncoder {
        microphone: MicrophoneTrack,
        released_at_finish: Arc<AtomicBool>,
    }

    impl MediaEncoder for OrderProbeEncoder {
        fn mime_type(&self) -> &'static str {
            "application/octet-stream"
        }

        fn write_audio_frame(&mut self, _: &[f32]) -> Result<Option<Vec<u8>>, SessionError> {
            Ok(Some(vec![1]))
        }

        fn finish(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
            self.released_at_finish
                .store(self.microphone.is_stopped(), Ordering::SeqCst);
            Ok(Some(vec![2]))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new("JD".into(), "Resume".into(), "key".into())
    }

    fn deps(
        media: Arc<dyn MediaBackend>,
        agent: Arc<dyn InterviewAgent>,
        oracle: Arc<dyn VisionOracle>,
    ) -> SessionDeps {
        SessionDeps {
            media,
            agent,
            oracle,
            speech: Arc::new(SilentSpeech),
            sink: Arc::new(NullSink),
            encoder: Box::new(crate::recorder::WavEncoder::new(16_000)),
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    // ── Start / permission ────────────────────────────────────────

    #[tokio::test]
    async fn permission_denial_fails_start() {
        let (agent, _tx, _control) = FakeAgent::new();
        let result = InterviewSession::start(
            config(),
            deps(Arc::new(FakeMedia { deny: true }), agent, ScriptedOracle::quiet()),
        )
        .await;
        assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn agent_failure_leaves_session_active_degraded() {
        let session = InterviewSession::start(
            config(),
            deps(
                Arc::new(FakeMedia { deny: false }),
                Arc::new(FailingAgent),
                ScriptedOracle::quiet(),
            ),
        )
        .await
        .unwrap();
        assert_eq!(session.state(), SessionState::Active);
        let artifact = session.end().await.unwrap();
        assert!(artifact.transcript.is_empty());
    }

    // ── Transcript scenario ───────────────────────────────────────

    #[tokio::test]
    async fn fragments_aggregate_and_turn_advances_question_count() {
        let (agent, tx, _control) = FakeAgent::new();
        let session = InterviewSession::start(
            config(),
            deps(Arc::new(FakeMedia { deny: false }), agent, ScriptedOracle::quiet()),
        )
        .await
        .unwrap();
        assert_eq!(session.question_count(), 1);

        tx.send(LiveEvent::InputTranscript {
            text: "I have".into(),
        })
        .await
        .unwrap();
        tx.send(LiveEvent::InputTranscript {
            text: " 5 years".into(),
        })
        .await
        .unwrap();
        tx.send(LiveEvent::TurnComplete).await.unwrap();
        settle().await;

        let transcript = session.transcript_snapshot();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].speaker, Speaker::Candidate);
        assert_eq!(transcript[0].text, "I have 5 years");
        assert!(transcript[0].timestamp.is_some());
        assert_eq!(session.question_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ai_status_follows_speech_and_silence() {
        let (agent, tx, _control) = FakeAgent::new();
        let session = InterviewSession::start(
            config(),
            deps(Arc::new(FakeMedia { deny: false }), agent, ScriptedOracle::quiet()),
        )
        .await
        .unwrap();
        assert_eq!(session.ai_status(), AiStatus::Thinking);

        tx.send(LiveEvent::InputTranscript { text: "Hi".into() })
            .await
            .unwrap();
        settle().await;
        assert_eq!(session.ai_status(), AiStatus::Listening);

        // 1.5 s of transcription silence flips Listening to Thinking.
        tokio::time::sleep(Duration::from_millis(1_600)).await;
        settle().await;
        assert_eq!(session.ai_status(), AiStatus::Thinking);

        tx.send(LiveEvent::OutputTranscript {
            text: "Tell me".into(),
        })
        .await
        .unwrap();
        settle().await;
        assert_eq!(session.ai_status(), AiStatus::Speaking);

        tx.send(LiveEvent::TurnComplete).await.unwrap();
        settle().await;
        assert_eq!(session.ai_status(), AiStatus::Idle);
    }

    // ── Warnings and termination ──────────────────────────────────

    fn camera_frame() -> VideoFrame {
        VideoFrame {
            width: 2,
            height: 2,
            rgb: vec![50; 12],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_violation_warns_then_second_terminates() {
        let (agent, _tx, _control) = FakeAgent::new();
        let cheating = FrameAnalysis {
            cheating_detected: true,
            cheating_reason: "Mobile phone usage".into(),
            ..Default::default()
        };
        let oracle = ScriptedOracle::new(vec![cheating.clone(), cheating]);
        let session = InterviewSession::start(
            config(),
            deps(Arc::new(FakeMedia { deny: false }), agent, oracle),
        )
        .await
        .unwrap();
        session.camera_video().push_frame(camera_frame());

        let mut state_rx = session.state_changes();
        while *state_rx.borrow() != SessionState::Terminated {
            if state_rx.changed().await.is_err() {
                break;
            }
        }

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.warning_count(), 2);
        // Terminated is absorbing: the graceful path is gone.
        assert!(matches!(
            session.end().await,
            Err(SessionError::AlreadyClosed)
        ));
        // Resources are torn down immediately.
        settle().await;
        assert!(session.microphone.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn single_violation_shows_transient_warning() {
        let (agent, _tx, _control) = FakeAgent::new();
        let cheating = FrameAnalysis {
            cheating_detected: true,
            ..Default::default()
        };
        let oracle = ScriptedOracle::new(vec![cheating]);
        let session = InterviewSession::start(
            config(),
            deps(Arc::new(FakeMedia { deny: false }), agent, oracle),
        )
        .await
        .unwrap();
        session.camera_video().push_frame(camera_frame());

        while session.warning_count() == 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.warning_count(), 1);
        assert!(session.cheating_warning_visible());

        // Auto-dismiss after the configured delay.
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        settle().await;
        assert!(!session.cheating_warning_visible());
    }

    // ── Teardown ordering ─────────────────────────────────────────

    #[tokio::test]
    async fn recorder_drains_before_media_release() {
        // The probe encoder needs to watch the same microphone the
        // session will own, so the media pair is prepared up front.
        struct PreparedMedia {
            pair: parking_lot::Mutex<Option<MediaStreamPair>>,
        }

        #[async_trait]
        impl MediaBackend for PreparedMedia {
            async fn acquire(&self) -> Result<MediaStreamPair, SessionError> {
                self.pair
                    .lock()
                    .take()
                    .ok_or_else(|| SessionError::PermissionDenied("already acquired".into()))
            }
        }

        let pair = MediaStreamPair::new();
        let microphone = pair.camera.microphone.clone();
        let released_at_finish = Arc::new(AtomicBool::new(true));

        let (agent, _tx, _control) = FakeAgent::new();
        let mut d = deps(
            Arc::new(PreparedMedia {
                pair: parking_lot::Mutex::new(Some(pair)),
            }),
            agent,
            ScriptedOracle::quiet(),
        );
        d.encoder = Box::new(OrderProbeEncoder {
            microphone: microphone.clone(),
            released_at_finish: Arc::clone(&released_at_finish),
        });

        let session = InterviewSession::start(config(), d).await.unwrap();
        microphone.push_frame(vec![0.1; 64]);
        settle().await;

        let artifact = session.end().await.unwrap();

        // The final chunk was drained while the tracks were still
        // live, and the tracks are released afterwards.
        assert!(!released_at_finish.load(Ordering::SeqCst));
        assert!(microphone.is_stopped());
        assert!(artifact.recording_data.starts_with("data:application/octet-stream;base64,"));
    }

    #[tokio::test]
    async fn end_yields_empty_recording_when_nothing_recorded() {
        let (agent, _tx, control) = FakeAgent::new();
        let session = InterviewSession::start(
            config(),
            deps(
                Arc::new(FakeMedia { deny: false }),
                agent,
                ScriptedOracle::quiet(),
            ),
        )
        .await
        .unwrap();

        let artifact = session.end().await.unwrap();
        assert_eq!(artifact.recording_data, "");
        assert_eq!(session.state(), SessionState::Ended);
        assert!(control.closed.load(Ordering::SeqCst));
        assert!(session.microphone.is_stopped());

        // A second end is rejected; the artifact is created once.
        assert!(matches!(
            session.end().await,
            Err(SessionError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn end_carries_code_submission() {
        let (agent, _tx, _control) = FakeAgent::new();
        let session = InterviewSession::start(
            config(),
            deps(
                Arc::new(FakeMedia { deny: false }),
                agent,
                ScriptedOracle::quiet(),
            ),
        )
        .await
        .unwrap();
        session.set_code_submission("def solve():\n    pass\n");
        let artifact = session.end().await.unwrap();
        assert_eq!(artifact.code_submission, "def solve():\n    pass\n");
    }

    // ── Mute ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn mute_does_not_close_streaming_session() {
        let (agent, _tx, control) = FakeAgent::new();
        let session = InterviewSession::start(
            config(),
            deps(
                Arc::new(FakeMedia { deny: false }),
                agent,
                ScriptedOracle::quiet(),
            ),
        )
        .await
        .unwrap();

        session.set_muted(true);
        settle().await;
        assert!(session.is_muted());
        assert!(!control.closed.load(Ordering::SeqCst));

        session.set_muted(false);
        assert!(!session.is_muted());
        session.end().await.unwrap();
    }
}
