//! MJPEG pipeline configuration and status types

use serde::{Deserialize, Serialize};

/// Text source for one overlay slot (left or right corner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlaySource {
    #[default]
    Disabled,
    CameraName,
    Timestamp,
    Custom,
    CaptureInfo,
}

/// Full per-camera stream configuration.
///
/// Validation happens at the admin boundary; by the time a config
/// reaches the supervisor it is assumed well-formed (quality 1-100,
/// overlay scale 1-10, non-zero capture dimensions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStreamConfig {
    pub camera_id: String,
    pub display_name: String,
    /// Platform device locator: numeric index, /dev path, or driver URI
    pub device_path: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub target_fps: f64,
    /// JPEG quality 1-100
    pub jpeg_quality: i32,
    /// 0 means "same as capture"
    #[serde(default)]
    pub output_width: u32,
    #[serde(default)]
    pub output_height: u32,
    /// Dedicated listener port for this camera
    pub mjpeg_port: u16,
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default)]
    pub overlay_left: OverlaySource,
    #[serde(default)]
    pub overlay_right: OverlaySource,
    #[serde(default)]
    pub overlay_left_text: String,
    #[serde(default)]
    pub overlay_right_text: String,
    /// Overlay size slider, 1-10
    #[serde(default = "default_overlay_scale")]
    pub overlay_scale: u32,
}

fn default_overlay_scale() -> u32 {
    5
}

impl CameraStreamConfig {
    /// Dimensions of frames as delivered to subscribers.
    pub fn output_size(&self) -> (u32, u32) {
        let w = if self.output_width > 0 {
            self.output_width
        } else {
            self.capture_width
        };
        let h = if self.output_height > 0 {
            self.output_height
        } else {
            self.capture_height
        };
        (w, h)
    }

    /// Target inter-frame interval in seconds.
    pub fn frame_interval(&self) -> f64 {
        if self.target_fps > 0.0 {
            1.0 / self.target_fps
        } else {
            1.0 / 15.0
        }
    }
}

/// Partial update payload for a registered camera.
///
/// Overlay fields apply live; capture/output/network fields require a
/// pipeline restart (decided by [`CameraUpdate::requires_restart`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraUpdate {
    pub display_name: Option<String>,
    pub device_path: Option<String>,
    pub capture_width: Option<u32>,
    pub capture_height: Option<u32>,
    pub target_fps: Option<f64>,
    pub jpeg_quality: Option<i32>,
    pub output_width: Option<u32>,
    pub output_height: Option<u32>,
    pub mjpeg_port: Option<u16>,
    pub auth_enabled: Option<bool>,
    pub overlay_left: Option<OverlaySource>,
    pub overlay_right: Option<OverlaySource>,
    pub overlay_left_text: Option<String>,
    pub overlay_right_text: Option<String>,
    pub overlay_scale: Option<u32>,
}

impl CameraUpdate {
    /// True when any changed field cannot be applied to a running
    /// pipeline in place.
    pub fn requires_restart(&self) -> bool {
        self.device_path.is_some()
            || self.capture_width.is_some()
            || self.capture_height.is_some()
            || self.target_fps.is_some()
            || self.jpeg_quality.is_some()
            || self.output_width.is_some()
            || self.output_height.is_some()
            || self.mjpeg_port.is_some()
            || self.auth_enabled.is_some()
    }

    /// Merge into an existing config, field by field.
    pub fn apply_to(&self, config: &mut CameraStreamConfig) {
        if let Some(ref v) = self.display_name {
            config.display_name = v.clone();
        }
        if let Some(ref v) = self.device_path {
            config.device_path = v.clone();
        }
        if let Some(v) = self.capture_width {
            config.capture_width = v;
        }
        if let Some(v) = self.capture_height {
            config.capture_height = v;
        }
        if let Some(v) = self.target_fps {
            config.target_fps = v;
        }
        if let Some(v) = self.jpeg_quality {
            config.jpeg_quality = v;
        }
        if let Some(v) = self.output_width {
            config.output_width = v;
        }
        if let Some(v) = self.output_height {
            config.output_height = v;
        }
        if let Some(v) = self.mjpeg_port {
            config.mjpeg_port = v;
        }
        if let Some(v) = self.auth_enabled {
            config.auth_enabled = v;
        }
        if let Some(v) = self.overlay_left {
            config.overlay_left = v;
        }
        if let Some(v) = self.overlay_right {
            config.overlay_right = v;
        }
        if let Some(ref v) = self.overlay_left_text {
            config.overlay_left_text = v.clone();
        }
        if let Some(ref v) = self.overlay_right_text {
            config.overlay_right_text = v.clone();
        }
        if let Some(v) = self.overlay_scale {
            config.overlay_scale = v;
        }
    }
}

/// Read-only status snapshot of one camera pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub camera_id: String,
    pub running: bool,
    /// Delivered resolution, e.g. "640x480"
    pub resolution: String,
    pub fps: f64,
    /// Measured frames/s over the last stats window, 1 decimal
    pub real_fps: f64,
    /// Measured bandwidth over the last stats window, 1 decimal
    pub bandwidth_kbps: f64,
    pub frame_count: u64,
    pub mjpeg_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub subscriber_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> CameraStreamConfig {
        CameraStreamConfig {
            camera_id: "1".to_string(),
            display_name: "Front Door".to_string(),
            device_path: "0".to_string(),
            capture_width: 1280,
            capture_height: 720,
            target_fps: 15.0,
            jpeg_quality: 80,
            output_width: 0,
            output_height: 0,
            mjpeg_port: 8554,
            auth_enabled: false,
            overlay_left: OverlaySource::CameraName,
            overlay_right: OverlaySource::Timestamp,
            overlay_left_text: String::new(),
            overlay_right_text: String::new(),
            overlay_scale: 5,
        }
    }

    #[test]
    fn test_output_size_defaults_to_capture() {
        let mut config = base_config();
        assert_eq!(config.output_size(), (1280, 720));
        config.output_width = 640;
        config.output_height = 480;
        assert_eq!(config.output_size(), (640, 480));
    }

    #[test]
    fn test_overlay_only_update_needs_no_restart() {
        let update = CameraUpdate {
            overlay_left_text: Some("lobby".to_string()),
            overlay_scale: Some(7),
            ..Default::default()
        };
        assert!(!update.requires_restart());
    }

    #[test]
    fn test_fps_update_needs_restart() {
        let update = CameraUpdate {
            target_fps: Some(30.0),
            ..Default::default()
        };
        assert!(update.requires_restart());
    }

    #[test]
    fn test_apply_merges_fields() {
        let mut config = base_config();
        let update = CameraUpdate {
            target_fps: Some(30.0),
            overlay_left: Some(OverlaySource::Custom),
            overlay_left_text: Some("hall".to_string()),
            ..Default::default()
        };
        update.apply_to(&mut config);
        assert_eq!(config.target_fps, 30.0);
        assert_eq!(config.overlay_left, OverlaySource::Custom);
        assert_eq!(config.overlay_left_text, "hall");
        assert_eq!(config.capture_width, 1280);
    }
}
