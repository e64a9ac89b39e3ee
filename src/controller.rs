//! The capture loop controller.
//!
//! Owns the session state and drives camera acquisition, the periodic
//! capture-upload-render tick and calibration. The window calls into it from
//! the UI thread; ticks run on a [`PeriodicTask`] thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Local;

use crate::calibration::{self, Baseline};
use crate::camera::{encode_jpeg, CameraBackend, CameraStream, Frame};
use crate::config::Config;
use crate::error::{CameraError, PredictError};
use crate::inference::Predictor;
use crate::scheduler::PeriodicTask;
use crate::session::{Label, Prediction, SessionState};

/// Read-only copy of what the window renders
#[derive(Debug, Clone)]
pub struct SessionView {
    pub running: bool,
    pub starting: bool,
    pub calibrating: bool,
    pub camera_active: bool,
    pub threshold: f64,
    pub calibrated: bool,
    pub status: String,
    pub badge: Option<Prediction>,
    /// (time label, confidence), oldest first
    pub trend: Vec<(String, f64)>,
    pub log: String,
    pub alert: Option<String>,
}

pub struct CaptureController {
    state: Arc<Mutex<SessionState>>,
    ticker: Mutex<Option<PeriodicTask>>,
    backend: Arc<dyn CameraBackend>,
    predictor: Arc<dyn Predictor>,
    config: Config,
}

impl CaptureController {
    pub fn new(
        config: Config,
        backend: Arc<dyn CameraBackend>,
        predictor: Arc<dyn Predictor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            ticker: Mutex::new(None),
            backend,
            predictor,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker(&self) -> MutexGuard<'_, Option<PeriodicTask>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the camera unless a stream is already active.
    ///
    /// Failures are shown in the status line and raised as an alert.
    pub fn start_camera(&self) -> Result<(), CameraError> {
        if self.state().camera.is_some() {
            return Ok(());
        }

        let opened = self.backend.open().and_then(CameraStream::start);
        let mut state = self.state();
        match opened {
            Ok(stream) => {
                // Another caller may have won the race while the device was opening
                if state.camera.is_none() {
                    state.camera = Some(stream);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Camera acquisition failed: {}", e);
                state.status = match e {
                    CameraError::Unsupported(_) => "Status: camera not supported".to_string(),
                    CameraError::AccessDenied(_) => "Status: camera access denied".to_string(),
                    CameraError::Device(_) => "Status: camera error".to_string(),
                };
                state.raise_alert(format!("Could not start the camera: {}", e));
                Err(e)
            }
        }
    }

    /// Releases the camera. No-op when none is active.
    pub fn stop_camera(&self) {
        let stream = self.state().camera.take();
        if let Some(stream) = stream {
            stream.stop();
        }
    }

    /// Latest camera frame, for the preview
    pub fn preview_frame(&self) -> Option<Frame> {
        self.state().camera.as_ref().and_then(CameraStream::latest_frame)
    }

    /// Snapshots the latest frame, uploads it and returns the confidence.
    pub fn fetch_confidence(&self) -> Result<f64, PredictError> {
        let frame = {
            let state = self.state();
            let camera = state.camera.as_ref().ok_or(PredictError::NoStream)?;
            camera.latest_frame().ok_or(PredictError::NoFrame)?
        };
        let jpeg = encode_jpeg(&frame, self.config.jpeg_quality)?;
        self.predictor.predict(jpeg)
    }

    /// Like [`fetch_confidence`](Self::fetch_confidence), but every failure
    /// collapses to `None` after being logged.
    pub fn send_frame_and_get_confidence(&self) -> Option<f64> {
        match self.fetch_confidence() {
            Ok(confidence) => Some(confidence),
            Err(PredictError::NoStream) => None,
            Err(e) => {
                log::warn!("Frame prediction failed: {}", e);
                None
            }
        }
    }

    pub fn decide_label_from_confidence(&self, confidence: f64) -> Label {
        self.state().decide_label(confidence)
    }

    /// One tick of the capture loop for run `generation`.
    ///
    /// Results arriving after a stop, or after a newer start, are dropped.
    pub fn send_frame_loop(&self, generation: u64) {
        {
            let mut state = self.state();
            if !state.running || state.generation != generation {
                return;
            }
            state.status = "Status: sending...".to_string();
        }

        let outcome = self.fetch_confidence();

        let mut state = self.state();
        if !state.running || state.generation != generation {
            log::debug!("Discarding result of stale tick (generation {})", generation);
            return;
        }
        match outcome {
            Ok(confidence) => {
                let time_label = Local::now().format("%H:%M:%S").to_string();
                let prediction = state.record_prediction(confidence, &time_label);
                log::debug!("{} ({:.1}%)", prediction.label, prediction.confidence);
            }
            Err(e) => {
                log::warn!("Tick failed: {}", e);
                state.status = e.status_text();
            }
        }
    }

    /// Starts the periodic capture loop.
    ///
    /// Opens the camera first, so it may block for the device open; the
    /// window calls it from a background thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        // Stop bumps the generation, which revokes this claim
        let claim = {
            let mut state = self.state();
            if state.running || state.starting {
                return Ok(());
            }
            if state.calibrating {
                state.status = "Status: calibration in progress".to_string();
                return Ok(());
            }
            state.starting = true;
            state.status = "Status: starting camera".to_string();
            state.generation
        };

        if let Err(e) = self.start_camera() {
            let mut state = self.state();
            if state.generation == claim {
                state.starting = false;
            }
            return Err(e).context("starting camera");
        }

        let generation = {
            let mut state = self.state();
            if state.generation != claim {
                // Stopped while the device was opening. A newer start may
                // already own the camera.
                let newer_start = state.starting;
                drop(state);
                if !newer_start {
                    self.stop_camera();
                }
                return Ok(());
            }
            state.starting = false;
            state.running = true;
            state.generation += 1;
            state.status = "Status: running".to_string();
            state.generation
        };

        let controller = Arc::clone(self);
        let spawned = PeriodicTask::spawn("capture-tick", self.config.tick_period, move || {
            controller.send_frame_loop(generation)
        });
        let task = match spawned {
            Ok(task) => task,
            Err(e) => {
                self.stop();
                return Err(e).context("spawning capture loop");
            }
        };

        let mut ticker = self.ticker();
        if let Some(mut previous) = ticker.replace(task) {
            previous.stop();
        }
        log::info!(
            "Capture loop started (generation {}, every {:?})",
            generation,
            self.config.tick_period
        );
        Ok(())
    }

    /// Stops the capture loop and releases the camera. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.state();
            if state.running {
                log::info!("Capture loop stopped (generation {})", state.generation);
            }
            state.running = false;
            state.starting = false;
            state.generation += 1;
            state.status = "Status: stopped".to_string();
        }
        if let Some(mut task) = self.ticker().take() {
            task.stop();
        }
        self.stop_camera();
    }

    /// Whether a periodic task is currently scheduled
    pub fn timer_active(&self) -> bool {
        self.ticker().as_ref().is_some_and(|t| !t.is_stopped())
    }

    /// Samples `frames` confidences over a neutral face and sets the
    /// threshold to their mean plus `margin`, capped at 95.
    ///
    /// Blocks for the duration of the sampling; the window runs it on a
    /// background thread.
    pub fn calibrate_baseline(&self, frames: usize, margin: f64) -> Option<Baseline> {
        {
            let mut state = self.state();
            if !margin.is_finite() {
                log::error!("Refusing to calibrate with margin {}", margin);
                state.status = "Status: invalid calibration margin".to_string();
                return None;
            }
            if state.running || state.starting {
                state.status = "Status: stop monitoring before calibrating".to_string();
                return None;
            }
            if state.calibrating {
                return None;
            }
            state.calibrating = true;
            state.status = "Status: calibrating (keep a neutral face)".to_string();
        }

        let result = self.run_calibration(frames, margin);
        self.state().calibrating = false;
        result
    }

    fn run_calibration(&self, frames: usize, margin: f64) -> Option<Baseline> {
        if self.start_camera().is_err() {
            let mut state = self.state();
            state.status = "Status: calibration aborted (camera unavailable)".to_string();
            return None;
        }

        log::info!("Calibrating over {} frames (margin {:.1})", frames, margin);
        let samples = calibration::collect_samples(
            frames,
            self.config.calibration.spacing,
            || self.send_frame_and_get_confidence(),
            |attempt, usable| {
                self.state().status = format!(
                    "Status: calibrating {}/{} ({} usable)",
                    attempt, frames, usable
                );
            },
        );

        let mut state = self.state();
        match calibration::derive_threshold(&samples, margin) {
            Some(baseline) => {
                state.threshold = baseline.threshold;
                state.calibrated = true;
                state.status = format!(
                    "Status: calibrated (baseline {:.1}%, threshold {:.1}%)",
                    baseline.mean, baseline.threshold
                );
                let time_label = Local::now().format("%H:%M:%S").to_string();
                state.log.prepend(format!(
                    "[{}] Calibrated: baseline {:.1}% from {} frames, threshold {:.1}%",
                    time_label, baseline.mean, baseline.samples, baseline.threshold
                ));
                log::info!(
                    "Calibration done: baseline {:.1}%, threshold {:.1}%",
                    baseline.mean,
                    baseline.threshold
                );
                Some(baseline)
            }
            None => {
                log::warn!("Calibration collected no usable samples");
                state.status = "Status: calibration failed (no usable frames)".to_string();
                state.raise_alert("Calibration failed: no frame produced a result.");
                None
            }
        }
    }

    pub fn dismiss_alert(&self) {
        self.state().alert = None;
    }

    pub fn view(&self) -> SessionView {
        let state = self.state();
        SessionView {
            running: state.running,
            starting: state.starting,
            calibrating: state.calibrating,
            camera_active: state.camera.is_some(),
            threshold: state.threshold,
            calibrated: state.calibrated,
            status: state.status.clone(),
            badge: state.badge,
            trend: state
                .trend
                .iter()
                .map(|p| (p.time_label.clone(), p.confidence))
                .collect(),
            log: state.log.text(),
            alert: state.alert.clone(),
        }
    }
}
