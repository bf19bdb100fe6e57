//! Application state
//!
//! Holds all shared components and state

use std::path::PathBuf;
use std::sync::Arc;

use crate::daemon_gateway::DaemonGateway;
use crate::device_enum::DeviceEnumerator;
use crate::mjpeg::MjpegSupervisor;
use crate::orchestrator::Orchestrator;
use crate::rtsp::RtspSupervisor;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Admin API host
    pub host: String,
    /// Admin API port
    pub port: u16,
    /// Motion-detection daemon URL
    pub daemon_url: String,
    /// First ingest port for RTSP streams
    pub rtsp_base_port: u16,
    /// Explicit ffmpeg location; PATH search when unset
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            daemon_url: std::env::var("DAEMON_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8765".to_string()),
            rtsp_base_port: std::env::var("RTSP_BASE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8554),
            ffmpeg_path: std::env::var("FFMPEG_PATH").map(PathBuf::from).ok(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// MJPEG pipeline supervisor
    pub mjpeg: Arc<MjpegSupervisor>,
    /// External encoder supervisor
    pub rtsp: Arc<RtspSupervisor>,
    /// MJPEG/RTSP hand-off coordination
    pub orchestrator: Arc<Orchestrator>,
    /// Motion-detection daemon adapter
    pub daemon: Arc<DaemonGateway>,
    /// Device enumeration source
    pub devices: Arc<dyn DeviceEnumerator>,
}
