//! Session state and the render step applied after each prediction.

use std::collections::VecDeque;
use std::fmt;

use crate::camera::CameraStream;

/// Threshold used until a calibration succeeds
pub const DEFAULT_THRESHOLD: f64 = 50.0;

/// Number of points kept in the trend chart
pub const TREND_CAPACITY: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Stressed,
    Relaxed,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Stressed => write!(f, "Stressed"),
            Label::Relaxed => write!(f, "Relaxed"),
        }
    }
}

/// `Stressed` when the confidence reaches the threshold, `Relaxed` otherwise.
pub fn decide_label(confidence: f64, threshold: f64) -> Label {
    if confidence >= threshold {
        Label::Stressed
    } else {
        Label::Relaxed
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Percent, 0-100
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendPoint {
    pub time_label: String,
    pub confidence: f64,
}

/// Fixed-capacity FIFO of recent confidences, oldest first
#[derive(Debug, Clone, Default)]
pub struct TrendSeries {
    points: VecDeque<TrendPoint>,
}

impl TrendSeries {
    pub fn push(&mut self, time_label: String, confidence: f64) {
        if self.points.len() >= TREND_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back(TrendPoint {
            time_label,
            confidence,
        });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrendPoint> {
        self.points.iter()
    }
}

/// Newest-first text log. Grows for the lifetime of the session.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    lines: VecDeque<String>,
}

impl ActivityLog {
    pub fn prepend(&mut self, line: String) {
        self.lines.push_front(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The whole log as one block, newest line first
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Mutable state of one monitoring session
pub struct SessionState {
    /// Active camera stream, if any
    pub camera: Option<CameraStream>,
    pub running: bool,
    /// Set while `start` is acquiring the camera
    pub starting: bool,
    pub calibrating: bool,
    pub threshold: f64,
    pub calibrated: bool,
    /// Bumped on every start and stop; ticks from an older generation are discarded
    pub generation: u64,
    pub status: String,
    /// Last successful prediction, shown as the result badge
    pub badge: Option<Prediction>,
    pub trend: TrendSeries,
    pub log: ActivityLog,
    /// Message that must be acknowledged by the user
    pub alert: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            camera: None,
            running: false,
            starting: false,
            calibrating: false,
            threshold: DEFAULT_THRESHOLD,
            calibrated: false,
            generation: 0,
            status: "Status: idle".to_string(),
            badge: None,
            trend: TrendSeries::default(),
            log: ActivityLog::default(),
            alert: None,
        }
    }
}

impl SessionState {
    pub fn decide_label(&self, confidence: f64) -> Label {
        decide_label(confidence, self.threshold)
    }

    /// Applies a successful prediction to the badge, trend, log and status line.
    pub fn record_prediction(&mut self, confidence: f64, time_label: &str) -> Prediction {
        let prediction = Prediction {
            label: self.decide_label(confidence),
            confidence,
        };
        self.badge = Some(prediction);
        self.trend.push(time_label.to_string(), confidence);
        self.log.prepend(format!(
            "[{}] {} ({:.1}%)",
            time_label, prediction.label, confidence
        ));
        self.status = self.idle_status();
        prediction
    }

    pub fn idle_status(&self) -> String {
        if self.calibrated {
            format!("Status: idle (calibrated threshold {:.1}%)", self.threshold)
        } else {
            format!("Status: idle (threshold {:.1}%)", self.threshold)
        }
    }

    pub fn raise_alert(&mut self, message: impl Into<String>) {
        self.alert = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_boundary_is_stressed() {
        assert_eq!(decide_label(50.0, 50.0), Label::Stressed);
        assert_eq!(decide_label(49.9, 50.0), Label::Relaxed);
        assert_eq!(decide_label(50.1, 50.0), Label::Stressed);
        assert_eq!(decide_label(0.0, 0.0), Label::Stressed);
        assert_eq!(decide_label(94.9, 95.0), Label::Relaxed);
    }

    #[test]
    fn trend_evicts_oldest_at_capacity() {
        let mut trend = TrendSeries::default();
        for tick in 1..=31 {
            trend.push(format!("t{}", tick), tick as f64);
        }

        assert_eq!(trend.len(), TREND_CAPACITY);
        let values: Vec<f64> = trend.iter().map(|p| p.confidence).collect();
        let expected: Vec<f64> = (2..=31).map(|t| t as f64).collect();
        assert_eq!(values, expected);
        assert_eq!(trend.iter().next().unwrap().time_label, "t2");
    }

    #[test]
    fn log_is_newest_first() {
        let mut log = ActivityLog::default();
        log.prepend("first".to_string());
        log.prepend("second".to_string());
        assert_eq!(log.text(), "second\nfirst");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn record_prediction_updates_every_surface() {
        let mut state = SessionState::default();
        let prediction = state.record_prediction(62.34, "12:00:01");

        assert_eq!(prediction.label, Label::Stressed);
        assert_eq!(state.badge, Some(prediction));
        assert_eq!(state.trend.len(), 1);
        assert_eq!(state.log.text(), "[12:00:01] Stressed (62.3%)");
        assert_eq!(state.status, "Status: idle (threshold 50.0%)");
    }

    #[test]
    fn record_prediction_uses_current_threshold() {
        let mut state = SessionState::default();
        state.threshold = 70.0;
        state.calibrated = true;

        let prediction = state.record_prediction(62.0, "12:00:02");
        assert_eq!(prediction.label, Label::Relaxed);
        assert_eq!(state.status, "Status: idle (calibrated threshold 70.0%)");
    }
}
