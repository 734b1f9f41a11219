//! Proctoring monitor.
//!
//! Two independent periodic checks run for the session's lifetime:
//!
//! - **Visual** (every 15 s): sample the latest webcam frame, compress
//!   to JPEG and submit to the vision oracle; the screen-share frame
//!   rides the same tick. Cheating is reported to the state machine on
//!   every detecting tick; aggregation into a warning count is the
//!   state machine's job. Candidate absence is edge-triggered: one
//!   spoken warning per false→true transition, suppressed until the
//!   candidate is confirmed present again.
//! - **Audio** (every 2 s): average energy of the raw microphone
//!   signal (mute-independent), flagged above a fixed threshold.
//!   Level-triggered: clears by itself once the energy drops.
//!
//! Both checks no-op while the host reports the document hidden, so a
//! backgrounded tab neither wastes oracle calls nor produces false
//! negatives; the timers themselves keep running. Oracle failures are
//! fail-open: no signal this tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::ProctorConfig;
use crate::media::{MicrophoneTrack, VideoTrack};
use crate::speech::SpeechSynthesizer;

pub mod vision;

pub use vision::{encode_frame_jpeg, FrameAnalysis, FrameKind, GeminiVisionOracle, VisionOracle};

// ── Constants ──────────────────────────────────────────────────────

/// Spoken once per absence transition.
const ABSENCE_WARNING: &str = "Please sit before the camera and continue the interview.";

// ── Signals ────────────────────────────────────────────────────────

/// Per-tick proctoring signal consumed by the session state machine.
///
/// Ephemeral: produced per sampling tick, never persisted. Cheating is
/// reported on every detecting tick; the other variants carry their
/// current level so stale warnings clear on their own.
#[derive(Debug, Clone, PartialEq)]
pub enum ProctorSignal {
    /// Confirmed cheating this tick.
    Cheating { detail: String },
    /// Candidate absence state changed (edge).
    Absence { absent: bool },
    /// Gaze-deviation level this tick.
    Gaze { deviated: bool },
    /// Video-quality issue this tick, if any.
    VideoQuality { reason: Option<String> },
    /// Background-noise level this tick.
    Noise { excessive: bool },
}

// ── Visibility gate ────────────────────────────────────────────────

/// Host-owned foreground/background flag.
///
/// The host flips this when its document visibility changes; hidden
/// means both proctoring checks skip their sampling work.
#[derive(Clone)]
pub struct Visibility {
    visible: Arc<AtomicBool>,
}

impl Visibility {
    pub fn new() -> Self {
        Self {
            visible: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new()
    }
}

// ── Audio level ────────────────────────────────────────────────────

/// Average signal level on the analyser's 0–255 scale.
pub fn average_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    (sum / samples.len() as f32) * 255.0
}

// ── Monitor ────────────────────────────────────────────────────────

/// Collaborators for a proctoring monitor.
pub struct ProctorDeps {
    pub oracle: Arc<dyn VisionOracle>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub camera: VideoTrack,
    pub screen: VideoTrack,
    pub microphone: MicrophoneTrack,
    pub visibility: Visibility,
    pub signals: mpsc::Sender<ProctorSignal>,
}

/// Runs the two proctoring timers until shut down.
pub struct ProctorMonitor {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ProctorMonitor {
    /// Spawn the visual and audio check tasks.
    pub fn start(config: ProctorConfig, deps: ProctorDeps) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        let visual = tokio::spawn(Self::visual_loop(
            config.clone(),
            deps.oracle,
            deps.speech,
            deps.camera,
            deps.screen,
            deps.microphone.clone(),
            deps.visibility.clone(),
            deps.signals.clone(),
            stop_rx.clone(),
        ));
        let audio = tokio::spawn(Self::audio_loop(
            config,
            deps.microphone,
            deps.visibility,
            deps.signals,
            stop_rx,
        ));

        Self {
            stop_tx,
            tasks: vec![visual, audio],
        }
    }

    /// Stop both timers. Idempotent; safe from any exit path.
    pub fn shutdown(&mut self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    // ── Visual check ──────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn visual_loop(
        config: ProctorConfig,
        oracle: Arc<dyn VisionOracle>,
        speech: Arc<dyn SpeechSynthesizer>,
        camera: VideoTrack,
        screen: VideoTrack,
        microphone: MicrophoneTrack,
        visibility: Visibility,
        signals: mpsc::Sender<ProctorSignal>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(config.visual_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would analyze before the candidate
        // settled in; the first real check lands one interval in.
        interval.tick().await;

        let mut absence_active = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !visibility.is_visible() {
                        continue;
                    }

                    if let Some(frame) = camera.latest() {
                        match encode_frame_jpeg(&frame, config.jpeg_quality) {
                            Ok(jpeg) => match oracle.analyze_frame(&jpeg, FrameKind::Webcam).await {
                                Ok(result) => {
                                    Self::handle_webcam_result(
                                        &result,
                                        &mut absence_active,
                                        &microphone,
                                        &speech,
                                        &signals,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    // Fail-open: a transient oracle failure
                                    // must not raise a false violation.
                                    tracing::warn!(error = %e, "Webcam analysis failed; no violation this tick");
                                }
                            },
                            Err(e) => {
                                tracing::debug!(error = %e, "Webcam frame compression failed");
                            }
                        }
                    }

                    if let Some(frame) = screen.latest() {
                        if let Ok(jpeg) = encode_frame_jpeg(&frame, config.jpeg_quality) {
                            match oracle.analyze_frame(&jpeg, FrameKind::Screen).await {
                                Ok(result) if result.cheating_detected => {
                                    let _ = signals
                                        .send(ProctorSignal::Cheating {
                                            detail: result.cheating_reason.clone(),
                                        })
                                        .await;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::warn!(error = %e, "Screen analysis failed; no violation this tick");
                                }
                            }
                        }
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }

        tracing::debug!("Visual proctoring loop stopped");
    }

    async fn handle_webcam_result(
        result: &FrameAnalysis,
        absence_active: &mut bool,
        microphone: &MicrophoneTrack,
        speech: &Arc<dyn SpeechSynthesizer>,
        signals: &mpsc::Sender<ProctorSignal>,
    ) {
        if result.cheating_detected {
            let _ = signals
                .send(ProctorSignal::Cheating {
                    detail: result.cheating_reason.clone(),
                })
                .await;
        }

        if result.candidate_absent {
            if !*absence_active {
                *absence_active = true;
                // The candidate must hear the warning and be able to
                // answer: force the microphone back on if muted.
                if !microphone.is_enabled() {
                    microphone.set_enabled(true);
                    tracing::info!("Microphone unmuted for absence warning");
                }
                let _ = signals.send(ProctorSignal::Absence { absent: true }).await;
                speech.speak(ABSENCE_WARNING).await;
            }
        } else if *absence_active {
            *absence_active = false;
            let _ = signals.send(ProctorSignal::Absence { absent: false }).await;
        }

        let _ = signals
            .send(ProctorSignal::Gaze {
                deviated: result.eye_contact_deviation,
            })
            .await;
        let reason = result
            .video_quality_issue
            .then(|| result.video_quality_reason.clone());
        let _ = signals.send(ProctorSignal::VideoQuality { reason }).await;
    }

    // ── Audio check ───────────────────────────────────────────────

    async fn audio_loop(
        config: ProctorConfig,
        microphone: MicrophoneTrack,
        visibility: Visibility,
        signals: mpsc::Sender<ProctorSignal>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut frames = microphone.subscribe();
        let mut interval = tokio::time::interval(Duration::from_millis(config.audio_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Drain everything captured since the previous tick
                    // even when hidden, so a stale backlog doesn't spike
                    // the first visible check.
                    let mut samples: Vec<f32> = Vec::new();
                    loop {
                        match frames.try_recv() {
                            Ok(frame) => samples.extend(frame),
                            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    if !visibility.is_visible() || samples.is_empty() {
                        continue;
                    }
                    let level = average_level(&samples);
                    let _ = signals
                        .send(ProctorSignal::Noise {
                            excessive: level > config.noise_threshold,
                        })
                        .await;
                }
                _ = stop_rx.changed() => break,
            }
        }

        tracing::debug!("Audio proctoring loop stopped");
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::media::VideoFrame;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    struct ScriptedOracle {
        results: Mutex<VecDeque<FrameAnalysis>>,
        calls: AtomicU32,
    }

    impl ScriptedOracle {
        fn new(results: Vec<FrameAnalysis>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionOracle for ScriptedOracle {
        async fn analyze_frame(
            &self,
            _jpeg_base64: &str,
            _kind: FrameKind,
        ) -> Result<FrameAnalysis, SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop_front()
                .ok_or_else(|| SessionError::Oracle("script exhausted".into()))
        }
    }

    #[derive(Default)]
    struct CountingSpeech {
        count: AtomicU32,
    }

    impl CountingSpeech {
        fn count(&self) -> u32 {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::speech::SpeechSynthesizer for CountingSpeech {
        async fn speak(&self, _text: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn absent(absent: bool) -> FrameAnalysis {
        FrameAnalysis {
            candidate_absent: absent,
            ..Default::default()
        }
    }

    fn cheating() -> FrameAnalysis {
        FrameAnalysis {
            cheating_detected: true,
            cheating_reason: "Mobile phone usage".into(),
            ..Default::default()
        }
    }

    struct Fixture {
        monitor: ProctorMonitor,
        signals: mpsc::Receiver<ProctorSignal>,
        camera: VideoTrack,
        microphone: MicrophoneTrack,
        visibility: Visibility,
    }

    fn start_monitor(oracle: Arc<dyn VisionOracle>, speech: Arc<dyn SpeechSynthesizer>) -> Fixture {
        let camera = VideoTrack::new();
        let screen = VideoTrack::new();
        let microphone = MicrophoneTrack::new();
        let visibility = Visibility::new();
        let (signal_tx, signals) = mpsc::channel(256);
        let monitor = ProctorMonitor::start(
            ProctorConfig::default(),
            ProctorDeps {
                oracle,
                speech,
                camera: camera.clone(),
                screen: screen.clone(),
                microphone: microphone.clone(),
                visibility: visibility.clone(),
                signals: signal_tx,
            },
        );
        Fixture {
            monitor,
            signals,
            camera,
            microphone,
            visibility,
        }
    }

    fn test_frame() -> VideoFrame {
        VideoFrame {
            width: 2,
            height: 2,
            rgb: vec![100; 12],
        }
    }

    fn drain(signals: &mut mpsc::Receiver<ProctorSignal>) -> Vec<ProctorSignal> {
        let mut out = Vec::new();
        while let Ok(s) = signals.try_recv() {
            out.push(s);
        }
        out
    }

    #[test]
    fn average_level_scale() {
        assert_eq!(average_level(&[]), 0.0);
        assert_eq!(average_level(&[0.0, 0.0]), 0.0);
        let loud = average_level(&[0.5, -0.5, 0.5, -0.5]);
        assert!((loud - 127.5).abs() < 0.01);
        assert!(average_level(&[0.1; 16]) < 35.0);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_warning_is_edge_triggered() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            absent(false),
            absent(true),
            absent(true),
            absent(false),
            absent(true),
        ]));
        let speech = Arc::new(CountingSpeech::default());
        let mut fx = start_monitor(oracle.clone(), speech.clone());
        fx.camera.push_frame(test_frame());

        while oracle.calls() < 5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        // Let the final handler finish and further (exhausted) ticks run.
        tokio::time::sleep(Duration::from_secs(60)).await;
        fx.monitor.shutdown();

        // Two false→true transitions, so exactly two spoken warnings.
        assert_eq!(speech.count(), 2);
        let absences: Vec<bool> = drain(&mut fx.signals)
            .into_iter()
            .filter_map(|s| match s {
                ProctorSignal::Absence { absent } => Some(absent),
                _ => None,
            })
            .collect();
        assert_eq!(absences, vec![true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_document_suppresses_oracle_calls() {
        let oracle = Arc::new(ScriptedOracle::new(vec![absent(false); 10]));
        let speech = Arc::new(CountingSpeech::default());
        let mut fx = start_monitor(oracle.clone(), speech);
        fx.camera.push_frame(test_frame());
        fx.visibility.set_visible(false);

        // Many intervals elapse while hidden; the timer keeps firing
        // but no frame is submitted.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(oracle.calls(), 0);

        // Calls resume once visible again.
        fx.visibility.set_visible(true);
        while oracle.calls() == 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        fx.monitor.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn cheating_reported_every_detecting_tick() {
        let oracle = Arc::new(ScriptedOracle::new(vec![cheating(), cheating()]));
        let speech = Arc::new(CountingSpeech::default());
        let mut fx = start_monitor(oracle.clone(), speech);
        fx.camera.push_frame(test_frame());

        while oracle.calls() < 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        fx.monitor.shutdown();

        let cheats = drain(&mut fx.signals)
            .into_iter()
            .filter(|s| matches!(s, ProctorSignal::Cheating { .. }))
            .count();
        assert_eq!(cheats, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn noise_flag_is_level_triggered() {
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let speech = Arc::new(CountingSpeech::default());
        let mut fx = start_monitor(oracle, speech);
        // Let the audio task subscribe before frames are pushed.
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Loud frames, then quiet frames across successive ticks.
        fx.microphone.push_frame(vec![0.8; 512]);
        tokio::time::sleep(Duration::from_secs(3)).await;
        fx.microphone.push_frame(vec![0.01; 512]);
        tokio::time::sleep(Duration::from_secs(3)).await;
        fx.monitor.shutdown();

        let noise: Vec<bool> = drain(&mut fx.signals)
            .into_iter()
            .filter_map(|s| match s {
                ProctorSignal::Noise { excessive } => Some(excessive),
                _ => None,
            })
            .collect();
        assert_eq!(noise, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_warning_unmutes_microphone() {
        let oracle = Arc::new(ScriptedOracle::new(vec![absent(true)]));
        let speech = Arc::new(CountingSpeech::default());
        let mut fx = start_monitor(oracle.clone(), speech);
        fx.camera.push_frame(test_frame());
        fx.microphone.set_enabled(false);

        while oracle.calls() < 1 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        fx.monitor.shutdown();

        assert!(fx.microphone.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn no_frame_means_no_oracle_call() {
        let oracle = Arc::new(ScriptedOracle::new(vec![absent(false); 4]));
        let speech = Arc::new(CountingSpeech::default());
        let mut fx = start_monitor(oracle.clone(), speech);
        // No camera frame pushed.
        tokio::time::sleep(Duration::from_secs(60)).await;
        fx.monitor.shutdown();
        assert_eq!(oracle.calls(), 0);
    }
}
