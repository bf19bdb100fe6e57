//! RTSP stream configuration and status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for one camera's external encoder push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtspStreamConfig {
    pub camera_id: String,
    /// Platform device locator: index, /dev path, or DirectShow name
    pub device_path: String,
    pub display_name: String,
    /// "WIDTHxHEIGHT"
    pub resolution: String,
    pub framerate: u32,
    /// kbit/s
    pub video_bitrate: u32,
    #[serde(default)]
    pub audio: Option<AudioConfig>,
    /// Relay ingest port this stream pushes to
    pub port: u16,
    /// Mount path on the relay, e.g. "/cam1"
    pub path: String,
}

/// Optional audio leg of an RTSP stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Platform audio locator: ALSA device or DirectShow name
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// kbit/s, ignored for pcm
    pub bitrate: u32,
    /// One of "aac", "opus", "mp3", "pcm"
    pub codec: String,
}

/// Status snapshot for one camera's encoder process.
#[derive(Debug, Clone, Serialize)]
pub struct RtspStreamStatus {
    pub camera_id: String,
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// True when the device name was resolved by a fuzzy or fallback
    /// match rather than an exact one.
    #[serde(default)]
    pub low_confidence_device_match: bool,
}

impl RtspStreamStatus {
    pub fn stopped(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            is_running: false,
            stream_url: None,
            has_audio: false,
            error: None,
            pid: None,
            started_at: None,
            low_confidence_device_match: false,
        }
    }

    pub fn failed(camera_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::stopped(camera_id)
        }
    }
}

impl RtspStreamConfig {
    /// Parse the "WxH" resolution string.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.resolution.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_parse() {
        let config = RtspStreamConfig {
            camera_id: "1".to_string(),
            device_path: "0".to_string(),
            display_name: "Cam".to_string(),
            resolution: "1280x720".to_string(),
            framerate: 30,
            video_bitrate: 2000,
            audio: None,
            port: 8554,
            path: "/cam1".to_string(),
        };
        assert_eq!(config.dimensions(), Some((1280, 720)));
    }
}
