use std::time::Duration;

use crate::camera::CameraDevice;

/// Calibration tuning
#[derive(Clone, Debug)]
pub struct CalibrationConfig {
    /// Number of frames sampled for the baseline
    pub frames: usize,
    /// Added to the baseline mean to obtain the threshold (percent)
    pub margin: f64,
    /// Pause between two samples
    pub spacing: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            frames: 30,
            margin: 15.0,
            spacing: Duration::from_millis(150),
        }
    }
}

/// Runtime configuration of the monitor
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the inference service, without the endpoint path
    pub server_url: String,
    pub device: CameraDevice,
    /// Period between two ticks
    pub tick_period: Duration,
    pub calibration: CalibrationConfig,
    /// JPEG quality (1-100) used for uploaded frames
    pub jpeg_quality: u8,
    /// Snapshot size used when the camera does not report its resolution
    pub fallback_size: (u32, u32),
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            device: CameraDevice::Index(0),
            tick_period: Duration::from_millis(600),
            calibration: CalibrationConfig::default(),
            jpeg_quality: 80,
            fallback_size: (480, 360),
            request_timeout: Duration::from_secs(10),
        }
    }
}
