//! Webcam stress monitor.
//!
//! Captures webcam frames, uploads them to a stress inference service and
//! shows the returned confidence as a live label, trend chart and log.
//! Calibration derives a personal threshold from a neutral-face baseline.

pub mod app;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod inference;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod fakes;
