//! Camera acquisition.
//!
//! A [`CameraBackend`] opens a device and hands back a [`FrameSource`].
//! [`CameraStream`] owns the source on a capture thread and keeps the most
//! recent frame, which the controller snapshots for upload and the window
//! shows as a preview.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageError};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, CAP_ANY, CAP_V4L2},
};

use crate::error::CameraError;

/// Reads attempted before a freshly opened device is declared dead
const PRIME_ATTEMPTS: usize = 10;
const READ_BACKOFF: Duration = Duration::from_millis(20);
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Which capture device to open
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraDevice {
    /// Backend-enumerated index (0 is the default webcam)
    Index(i32),
    /// Device node such as `/dev/video4`, opened through V4L2
    Path(PathBuf),
}

impl CameraDevice {
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<i32>() {
            Ok(index) => CameraDevice::Index(index),
            Err(_) => CameraDevice::Path(PathBuf::from(s.trim())),
        }
    }
}

impl fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraDevice::Index(i) => write!(f, "camera #{}", i),
            CameraDevice::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// A captured frame in packed RGB8
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Arc<Vec<u8>>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}

/// JPEG-encodes a frame at the given quality (1-100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode(&frame.rgb, frame.width, frame.height, ExtendedColorType::Rgb8)?;
    Ok(out.into_inner())
}

/// Snapshot size for a device reporting `width`x`height`.
///
/// Backends report 0 when they do not know the resolution; the fallback is
/// used then.
pub fn snapshot_size(width: f64, height: f64, fallback: (u32, u32)) -> (u32, u32) {
    if width >= 1.0 && height >= 1.0 {
        (width as u32, height as u32)
    } else {
        fallback
    }
}

/// Something that yields camera frames
pub trait FrameSource: Send {
    /// Blocks for the next frame. `Ok(None)` means no frame was ready.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait CameraBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// OpenCV `videoio` backend
pub struct OpenCvBackend {
    device: CameraDevice,
    fallback_size: (u32, u32),
}

impl OpenCvBackend {
    pub fn new(device: CameraDevice, fallback_size: (u32, u32)) -> Self {
        Self {
            device,
            fallback_size,
        }
    }

    /// Checks the device node before handing it to OpenCV, which reports
    /// every failure the same way.
    fn check_device_path(&self, path: &PathBuf) -> Result<(), CameraError> {
        let name = path.display().to_string();
        if let Err(e) = fs::metadata(path) {
            return Err(match e.kind() {
                io::ErrorKind::NotFound => CameraError::Unsupported(name),
                io::ErrorKind::PermissionDenied => CameraError::AccessDenied(name),
                _ => CameraError::Device(format!("{}: {}", name, e)),
            });
        }
        if let Err(e) = File::open(path) {
            return Err(match e.kind() {
                io::ErrorKind::PermissionDenied => CameraError::AccessDenied(name),
                _ => CameraError::Device(format!("{}: {}", name, e)),
            });
        }
        Ok(())
    }
}

impl CameraBackend for OpenCvBackend {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        log::info!("Opening camera at {}", self.device);

        let cap = match &self.device {
            CameraDevice::Index(index) => VideoCapture::new(*index, CAP_ANY),
            CameraDevice::Path(path) => {
                self.check_device_path(path)?;
                VideoCapture::from_file(&path.to_string_lossy(), CAP_V4L2)
            }
        };
        let cap = cap.map_err(|e| {
            log::error!("Failed to open camera {}: {}", self.device, e);
            CameraError::Device(e.to_string())
        })?;

        if !cap.is_opened().unwrap_or(false) {
            log::error!("Camera {} is not opened", self.device);
            return Err(match self.device {
                CameraDevice::Index(_) => CameraError::Unsupported(self.device.to_string()),
                CameraDevice::Path(_) => {
                    CameraError::Device(format!("{} could not be opened", self.device))
                }
            });
        }

        let (width, height) = snapshot_size(
            cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0),
            cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0),
            self.fallback_size,
        );
        log::info!("Camera opened successfully ({}x{})", width, height);

        Ok(Box::new(OpenCvSource {
            cap,
            target: Size::new(width as i32, height as i32),
            raw: Mat::default(),
            resized: Mat::default(),
            rgb: Mat::default(),
        }))
    }
}

struct OpenCvSource {
    cap: VideoCapture,
    /// Size frames are delivered at
    target: Size,
    raw: Mat,
    resized: Mat,
    rgb: Mat,
}

impl FrameSource for OpenCvSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.cap.read(&mut self.raw)? || self.raw.empty() {
            return Ok(None);
        }

        let bgr = if self.raw.size()? == self.target {
            &self.raw
        } else {
            imgproc::resize(
                &self.raw,
                &mut self.resized,
                self.target,
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )?;
            &self.resized
        };
        imgproc::cvt_color(bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let size = self.rgb.size()?;
        Ok(Some(Frame {
            width: size.width as u32,
            height: size.height as u32,
            rgb: Arc::new(self.rgb.data_bytes()?.to_vec()),
        }))
    }
}

/// An acquired camera, read continuously on a capture thread
pub struct CameraStream {
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Frame>>>,
    handle: Option<JoinHandle<()>>,
}

impl CameraStream {
    /// Waits for the first frame from `source`, then keeps reading it on a
    /// capture thread.
    pub fn start(mut source: Box<dyn FrameSource>) -> Result<Self, CameraError> {
        let first = prime(source.as_mut())?;

        let running = Arc::new(AtomicBool::new(true));
        let latest = Arc::new(Mutex::new(Some(first)));

        let handle = {
            let running = running.clone();
            let latest = latest.clone();
            thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || capture_loop(source, running, latest))
                .map_err(|e| CameraError::Device(format!("capture thread: {}", e)))?
        };

        Ok(Self {
            running,
            latest,
            handle: Some(handle),
        })
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the capture thread and releases the device.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Camera capture thread panicked");
            }
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn prime(source: &mut dyn FrameSource) -> Result<Frame, CameraError> {
    for _ in 0..PRIME_ATTEMPTS {
        match source.read_frame() {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) => thread::sleep(READ_BACKOFF),
            Err(e) => return Err(CameraError::Device(e.to_string())),
        }
    }
    Err(CameraError::Device("camera delivered no frames".to_string()))
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Frame>>>,
) {
    while running.load(Ordering::Acquire) {
        match source.read_frame() {
            Ok(Some(frame)) => {
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
            }
            Ok(None) => thread::sleep(READ_BACKOFF),
            Err(e) => {
                log::error!("Camera read failed: {}", e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    drop(source);
    log::info!("Camera capture stopped");
}
