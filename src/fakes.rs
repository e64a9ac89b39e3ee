//! In-memory camera and predictor used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::camera::{CameraBackend, Frame, FrameSource};
use crate::error::{CameraError, PredictError};
use crate::inference::Predictor;

pub struct FakeSource {
    width: u32,
    height: u32,
    silent: bool,
    reads: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            silent: false,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A device that opens but never delivers a frame
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new(0, 0)
        }
    }

    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    pub fn solid_frame(width: u32, height: u32) -> Frame {
        let rgb = [200u8, 120, 40]
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame {
            width,
            height,
            rgb: Arc::new(rgb),
        }
    }
}

impl FrameSource for FakeSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        if self.silent {
            return Ok(None);
        }
        Ok(Some(Self::solid_frame(self.width, self.height)))
    }
}

#[derive(Clone, Copy, Debug)]
pub enum FakeCamera {
    Working,
    Unsupported,
    Denied,
}

pub struct FakeBackend {
    mode: FakeCamera,
    opens: AtomicUsize,
    open_delay: Duration,
}

impl FakeBackend {
    pub fn new(mode: FakeCamera) -> Self {
        Self {
            mode,
            opens: AtomicUsize::new(0),
            open_delay: Duration::ZERO,
        }
    }

    /// A working camera that takes `delay` to open
    pub fn slow(delay: Duration) -> Self {
        Self {
            open_delay: delay,
            ..Self::new(FakeCamera::Working)
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CameraBackend for FakeBackend {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.open_delay);
        match self.mode {
            FakeCamera::Working => Ok(Box::new(FakeSource::new(8, 6))),
            FakeCamera::Unsupported => Err(CameraError::Unsupported("fake".to_string())),
            FakeCamera::Denied => Err(CameraError::AccessDenied("fake".to_string())),
        }
    }
}

/// Scripted replies for the predictor
#[derive(Clone, Debug)]
pub enum Reply {
    Confidence(f64),
    ApiError(&'static str),
    ServerError(u16),
}

impl Reply {
    fn into_result(self) -> Result<f64, PredictError> {
        match self {
            Reply::Confidence(c) => Ok(c),
            Reply::ApiError(msg) => Err(PredictError::Api(msg.to_string())),
            Reply::ServerError(status) => Err(PredictError::Server {
                status,
                message: None,
            }),
        }
    }
}

/// Plays back scripted replies, then repeats `fallback`
pub struct FakePredictor {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
}

impl FakePredictor {
    pub fn always(reply: Reply) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for FakePredictor {
    fn predict(&self, jpeg: Vec<u8>) -> Result<f64, PredictError> {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "predictor expects a JPEG");
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        reply.into_result()
    }
}
