//! Real microphone capture via cpal.
//!
//! Opens the default input device, converts to mono, resamples to the
//! 16 kHz transport rate and pushes frames into a [`MicrophoneTrack`].
//! The cpal stream is not `Send`, so a dedicated thread owns it for
//! the capture's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{MicrophoneTrack, MIC_FRAME_SAMPLES};
use crate::audio::{resample_linear, INPUT_SAMPLE_RATE};
use crate::error::SessionError;

/// Handle to a running device capture. Stops on [`stop`] or drop.
pub struct DeviceMicrophone {
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl DeviceMicrophone {
    /// Start capturing from the default input device into `track`.
    pub fn start(track: MicrophoneTrack) -> Result<Self, SessionError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            SessionError::PermissionDenied("no default input device".to_string())
        })?;
        let config = device.default_input_config().map_err(|e| {
            SessionError::PermissionDenied(format!("input device unavailable: {e}"))
        })?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();

        tracing::info!(
            device = device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate,
            channels,
            "Starting microphone capture"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let join = thread::Builder::new()
            .name("intervox-capture".into())
            .spawn(move || {
                // Accumulate enough device-rate samples that each
                // pushed frame resamples to the standard frame size.
                let chunk = (MIC_FRAME_SAMPLES as u64 * sample_rate as u64
                    / INPUT_SAMPLE_RATE as u64) as usize;
                let pending: Arc<parking_lot::Mutex<Vec<f32>>> =
                    Arc::new(parking_lot::Mutex::new(Vec::with_capacity(chunk * 2)));

                let pending_cb = Arc::clone(&pending);
                let track_cb = track.clone();
                let on_samples = move |mono: &mut dyn Iterator<Item = f32>| {
                    let mut buf = pending_cb.lock();
                    buf.extend(mono);
                    while buf.len() >= chunk {
                        let frame: Vec<f32> = buf.drain(..chunk).collect();
                        track_cb.push_frame(resample_linear(
                            &frame,
                            sample_rate,
                            INPUT_SAMPLE_RATE,
                        ));
                    }
                };

                let err_fn = |e| tracing::warn!(error = %e, "Capture stream error");
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        device.build_input_stream(
                            &stream_config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                on_samples(&mut data.iter().step_by(channels).copied());
                            },
                            err_fn,
                            None,
                        )
                    }
                    cpal::SampleFormat::I16 => {
                        device.build_input_stream(
                            &stream_config,
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                on_samples(
                                    &mut data
                                        .iter()
                                        .step_by(channels)
                                        .map(|&s| s as f32 / 32768.0),
                                );
                            },
                            err_fn,
                            None,
                        )
                    }
                    other => {
                        tracing::error!(format = ?other, "Unsupported input sample format");
                        return;
                    }
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to build capture stream");
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    tracing::error!(error = %e, "Failed to start capture stream");
                    return;
                }

                while !stop_for_thread.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                tracing::debug!("Microphone capture stopped");
            })
            .map_err(|e| SessionError::PermissionDenied(format!("capture thread: {e}")))?;

        Ok(Self {
            stop,
            join: Some(join),
        })
    }

    /// Stop capture and wait for the device thread to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for DeviceMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
