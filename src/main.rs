use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use docopt::Docopt;
use eframe::egui;
use serde::Deserialize;

use stress_monitor::app::StressMonitorApp;
use stress_monitor::camera::{CameraDevice, OpenCvBackend};
use stress_monitor::config::Config;
use stress_monitor::controller::CaptureController;
use stress_monitor::inference::HttpPredictor;
use stress_monitor::session::{decide_label, DEFAULT_THRESHOLD};

const USAGE: &str = "
Stress monitor: streams webcam frames to a stress inference service and charts the returned confidence.

Usage:
  stress-monitor [options]
  stress-monitor [--server=<url>] [--timeout-secs=<s>] --analyze=<video>
  stress-monitor (--version | -v)
  stress-monitor (--help | -h)

Options:
    --server=<url>        Base URL of the inference service [default: http://127.0.0.1:5000]
    --device=<dev>        Camera index or V4L2 device path [default: 0]
    --period-ms=<ms>      Milliseconds between two uploaded frames [default: 600]
    --frames=<n>          Frames sampled during calibration [default: 30]
    --margin=<pct>        Added to the calibration baseline to get the threshold [default: 15.0]
    --timeout-secs=<s>    HTTP request timeout [default: 10]
    --analyze=<video>     Upload a recorded video for a single verdict instead of opening the window
    --version, -v         Show version
    --help, -h            Show help
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_server: String,
    flag_device: String,
    flag_period_ms: u64,
    flag_frames: usize,
    flag_margin: f64,
    flag_timeout_secs: u64,
    flag_analyze: Option<String>,
}

impl Args {
    /// Rejects values docopt accepts but the monitor cannot use.
    fn validate(&self) -> Result<(), String> {
        if !self.flag_margin.is_finite() {
            return Err(format!("--margin must be a finite number, got {}", self.flag_margin));
        }
        if self.flag_frames == 0 {
            return Err("--frames must be at least 1".to_string());
        }
        Ok(())
    }

    fn into_config(self) -> Config {
        let mut config = Config {
            server_url: self.flag_server,
            device: CameraDevice::parse(&self.flag_device),
            tick_period: Duration::from_millis(self.flag_period_ms.max(1)),
            request_timeout: Duration::from_secs(self.flag_timeout_secs),
            ..Config::default()
        };
        config.calibration.frames = self.flag_frames;
        config.calibration.margin = self.flag_margin;
        config
    }
}

fn analyze(config: &Config, video: &Path) -> Result<()> {
    let predictor = HttpPredictor::new(&config.server_url, config.request_timeout)?;
    let confidence = predictor.analyze_video(video)?;
    let label = decide_label(confidence, DEFAULT_THRESHOLD);
    println!("{}: {} ({:.1}%)", video.display(), label, confidence);
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let version = env!("CARGO_PKG_NAME").to_string() + ", version: " + env!("CARGO_PKG_VERSION");
    let args: Args = Docopt::new(USAGE)
        .map(|d| d.help(true))
        .map(|d| d.version(Some(version)))
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    if let Err(msg) = args.validate() {
        docopt::Error::Argv(msg).exit();
    }

    let analyze_path = args.flag_analyze.clone();
    let config = args.into_config();

    if let Some(video) = analyze_path {
        return analyze(&config, Path::new(&video));
    }

    log::info!("Starting stress monitor");
    log::info!("Inference service: {}", config.server_url);
    log::info!("Camera device: {}", config.device);

    let backend = Arc::new(OpenCvBackend::new(config.device.clone(), config.fallback_size));
    let predictor = Arc::new(HttpPredictor::new(&config.server_url, config.request_timeout)?);
    let controller = CaptureController::new(config, backend, predictor);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 760.0])
            .with_title("Stress Monitor"),
        ..Default::default()
    };

    eframe::run_native(
        "Stress Monitor",
        options,
        Box::new(|_cc| Ok(Box::new(StressMonitorApp::new(controller)))),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    Ok(())
}
