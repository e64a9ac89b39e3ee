//! Client for the remote stress inference service.
//!
//! Frames go to `POST /predict_frame` as multipart field `image`; recorded
//! videos go to `POST /predict` as field `file`. Both answer with JSON carrying
//! a `confidence` percent, or an `error` string.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{multipart, Client};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::PredictError;

const FRAME_ENDPOINT: &str = "predict_frame";
const VIDEO_ENDPOINT: &str = "predict";

/// Turns an encoded frame into a stress confidence
pub trait Predictor: Send + Sync {
    fn predict(&self, jpeg: Vec<u8>) -> Result<f64, PredictError>;
}

/// JSON body returned by both endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Key under which the server archived the frame, when it did
    #[serde(default)]
    pub s3_key: Option<String>,
}

/// Maps an HTTP status and body onto a confidence.
///
/// Any non-2xx status fails, as does an `error` field regardless of status.
pub fn interpret_response(status: StatusCode, body: &[u8]) -> Result<f64, PredictError> {
    let parsed = serde_json::from_slice::<PredictResponse>(body);

    if !status.is_success() {
        let message = parsed.ok().and_then(|r| r.error);
        return Err(PredictError::Server {
            status: status.as_u16(),
            message,
        });
    }

    let response = parsed.map_err(|e| PredictError::Malformed(e.to_string()))?;
    if let Some(error) = response.error {
        return Err(PredictError::Api(error));
    }
    if let Some(key) = &response.s3_key {
        log::debug!("Server archived frame as {}", key);
    }
    if let Some(label) = &response.label {
        log::debug!("Server label {} ignored in favour of local threshold", label);
    }

    match response.confidence {
        Some(c) if c.is_finite() => Ok(c),
        Some(c) => Err(PredictError::Malformed(format!("confidence {} is not finite", c))),
        None => Err(PredictError::Malformed("missing confidence".to_string())),
    }
}

/// HTTP implementation of [`Predictor`]
pub struct HttpPredictor {
    client: Client,
    frame_url: String,
    video_url: String,
}

impl HttpPredictor {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let base = server_url.trim_end_matches('/');
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building inference HTTP client")?;

        Ok(Self {
            client,
            frame_url: format!("{}/{}", base, FRAME_ENDPOINT),
            video_url: format!("{}/{}", base, VIDEO_ENDPOINT),
        })
    }

    pub fn frame_url(&self) -> &str {
        &self.frame_url
    }

    /// Uploads a recorded video and returns the confidence averaged over
    /// its frames.
    pub fn analyze_video(&self, path: &Path) -> Result<f64> {
        let form = multipart::Form::new()
            .file("file", path)
            .with_context(|| format!("reading video {}", path.display()))?;

        log::info!("Uploading {} to {}", path.display(), self.video_url);
        let resp = self
            .client
            .post(&self.video_url)
            .multipart(form)
            .send()
            .context("sending video")?;
        let status = resp.status();
        let body = resp.bytes().context("reading video response")?;

        interpret_response(status, &body).context("video analysis failed")
    }
}

impl Predictor for HttpPredictor {
    fn predict(&self, jpeg: Vec<u8>) -> Result<f64, PredictError> {
        let part = multipart::Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = multipart::Form::new().part("image", part);

        let resp = self.client.post(&self.frame_url).multipart(form).send()?;
        let status = resp.status();
        let body = resp.bytes()?;
        interpret_response(status, &body)
    }
}
