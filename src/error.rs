use thiserror::Error;

/// Failures while acquiring the camera. All of them raise an alert.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No capture device or backend exists for the configured device
    #[error("no camera available at {0}")]
    Unsupported(String),
    /// The OS refused access to the device
    #[error("access to camera {0} was denied")]
    AccessDenied(String),
    #[error("camera error: {0}")]
    Device(String),
}

/// Reasons a frame did not produce a confidence.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("no active camera stream")]
    NoStream,
    #[error("camera has not delivered a frame yet")]
    NoFrame,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned HTTP {status}")]
    Server { status: u16, message: Option<String> },
    /// The body carried an explicit `error` field
    #[error("server reported: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl PredictError {
    /// Text shown in the status line when a tick fails.
    pub fn status_text(&self) -> String {
        match self {
            PredictError::NoStream => "Status: camera not running".to_string(),
            PredictError::NoFrame => "Status: waiting for camera".to_string(),
            PredictError::Encode(_) => "Status: encoding error".to_string(),
            PredictError::Network(_) => "Status: network error".to_string(),
            PredictError::Server {
                status,
                message: Some(msg),
            } => format!("Status: error {} ({})", status, msg),
            PredictError::Server { status, .. } => format!("Status: error {}", status),
            PredictError::Api(msg) => format!("Status: {}", msg),
            PredictError::Malformed(_) => "Status: bad response".to_string(),
        }
    }
}
