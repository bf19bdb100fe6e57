//! camstream - local camera management and streaming front-end
//!
//! Per-camera MJPEG capture/serve pipelines plus supervised external
//! encoder (ffmpeg) processes for RTSP, with orchestration of which
//! path owns a device at a time.

pub mod auth;
pub mod daemon_gateway;
pub mod device_enum;
pub mod error;
pub mod mjpeg;
pub mod models;
pub mod orchestrator;
pub mod rtsp;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
