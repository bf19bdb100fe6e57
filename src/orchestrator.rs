//! Stream-mode orchestration
//!
//! ## Responsibilities
//!
//! - Decide which path owns a camera's physical device at a time:
//!   internal MJPEG pipeline or external RTSP encoder
//! - Perform the hand-off: the current owner is stopped before the
//!   other path starts (same device, exclusive access)
//!
//! Neither supervisor ever stops the other; all cross-path
//! coordination happens here.

use serde::Deserialize;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mjpeg::MjpegSupervisor;
use crate::rtsp::types::{AudioConfig, RtspStreamConfig, RtspStreamStatus};
use crate::rtsp::RtspSupervisor;

/// RTSP enable request; unset fields fall back to the camera's MJPEG
/// configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RtspEnableOptions {
    pub framerate: Option<u32>,
    /// kbit/s
    pub video_bitrate: Option<u32>,
    pub audio: Option<AudioConfig>,
}

const DEFAULT_VIDEO_BITRATE: u32 = 2000;

pub struct Orchestrator {
    mjpeg: Arc<MjpegSupervisor>,
    rtsp: Arc<RtspSupervisor>,
}

impl Orchestrator {
    pub fn new(mjpeg: Arc<MjpegSupervisor>, rtsp: Arc<RtspSupervisor>) -> Self {
        Self { mjpeg, rtsp }
    }

    /// Switch a camera to the RTSP path: stop its MJPEG pipeline,
    /// derive the encoder config from the camera's stream config, and
    /// start the encoder. On a failed start the MJPEG pipeline is
    /// brought back if it was running before the attempt.
    pub async fn enable_rtsp(
        &self,
        camera_id: &str,
        options: RtspEnableOptions,
    ) -> Result<RtspStreamStatus> {
        if !self.mjpeg.contains(camera_id).await {
            return Err(Error::NotFound(format!("camera '{}'", camera_id)));
        }
        let camera = self.mjpeg.device_stream(camera_id).await?.config();
        let was_running = self.mjpeg.is_running(camera_id).await;

        if was_running {
            tracing::info!(camera_id = %camera_id, "Stopping MJPEG pipeline for RTSP hand-off");
            self.mjpeg.stop(camera_id).await?;
        }

        let (width, height) = camera.output_size();
        let port = self.rtsp.port_for_camera(camera_id);
        let config = RtspStreamConfig {
            camera_id: camera_id.to_string(),
            device_path: camera.device_path.clone(),
            display_name: camera.display_name.clone(),
            resolution: format!("{}x{}", width, height),
            framerate: options
                .framerate
                .unwrap_or_else(|| camera.target_fps.round() as u32),
            video_bitrate: options.video_bitrate.unwrap_or(DEFAULT_VIDEO_BITRATE),
            audio: options.audio,
            port,
            path: format!("/cam{}", camera_id),
        };

        let status = self.rtsp.start_stream(config).await;
        if !status.is_running && was_running {
            tracing::warn!(camera_id = %camera_id, "RTSP start failed, resuming MJPEG pipeline");
            if let Err(e) = self.mjpeg.start(camera_id).await {
                tracing::error!(camera_id = %camera_id, error = %e, "MJPEG resume failed");
            }
        }
        Ok(status)
    }

    /// Switch a camera back to the MJPEG path. Returns whether an
    /// encoder was actually stopped.
    pub async fn disable_rtsp(&self, camera_id: &str, resume_mjpeg: bool) -> Result<bool> {
        let stopped = self.rtsp.stop_stream(camera_id).await;
        if resume_mjpeg && self.mjpeg.contains(camera_id).await {
            self.mjpeg.start(camera_id).await?;
        }
        Ok(stopped)
    }

    /// True while the RTSP path owns the device; the admin MJPEG proxy
    /// must refuse with a conflict during that window.
    pub async fn is_rtsp_authoritative(&self, camera_id: &str) -> bool {
        self.rtsp.is_active(camera_id).await
    }

    pub async fn rtsp_status(&self, camera_id: &str) -> RtspStreamStatus {
        self.rtsp.get_stream_status(camera_id).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::device_enum::StaticDeviceEnumerator;
    use crate::mjpeg::types::{CameraStreamConfig, OverlaySource};
    use crate::mjpeg::TestPatternBackend;
    use crate::rtsp::command::PlatformBackend;
    use crate::rtsp::{EncoderCommandBuilder, RelayMonitor};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    fn fake_encoder(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("camstream-fake-orch-{}", name));
        std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn camera_config(port: u16) -> CameraStreamConfig {
        CameraStreamConfig {
            camera_id: "1".to_string(),
            display_name: "Cam 1".to_string(),
            device_path: "0".to_string(),
            capture_width: 320,
            capture_height: 240,
            target_fps: 15.0,
            jpeg_quality: 80,
            output_width: 0,
            output_height: 0,
            mjpeg_port: port,
            auth_enabled: false,
            overlay_left: OverlaySource::Disabled,
            overlay_right: OverlaySource::Disabled,
            overlay_left_text: String::new(),
            overlay_right_text: String::new(),
            overlay_scale: 5,
        }
    }

    #[tokio::test]
    async fn test_rtsp_handoff_and_resume() {
        // Fake relay listening on the port camera "1" maps to.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_port = listener.local_addr().unwrap().port();

        let mjpeg = Arc::new(
            MjpegSupervisor::new(Arc::new(TestPatternBackend::new())).unwrap(),
        );
        let builder = EncoderCommandBuilder::with_program(
            fake_encoder("handoff"),
            PlatformBackend::V4l2Alsa,
            Arc::new(StaticDeviceEnumerator::empty()),
        );
        let rtsp = Arc::new(RtspSupervisor::new(
            builder,
            RelayMonitor::with_names("definitely-not-a-real-binary", "none"),
            relay_port,
        ));
        let orchestrator = Orchestrator::new(mjpeg.clone(), rtsp.clone());

        mjpeg.add(camera_config(19501), None).await.unwrap();
        mjpeg.start("1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(mjpeg.is_running("1").await);

        let status = orchestrator
            .enable_rtsp("1", RtspEnableOptions::default())
            .await
            .unwrap();
        assert!(status.is_running, "error: {:?}", status.error);
        assert!(!mjpeg.is_running("1").await);
        assert!(orchestrator.is_rtsp_authoritative("1").await);

        assert!(orchestrator.disable_rtsp("1", true).await.unwrap());
        assert!(!orchestrator.is_rtsp_authoritative("1").await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(mjpeg.is_running("1").await);

        mjpeg.stop_all().await;
    }

    #[tokio::test]
    async fn test_enable_rtsp_unknown_camera() {
        let mjpeg = Arc::new(
            MjpegSupervisor::new(Arc::new(TestPatternBackend::new())).unwrap(),
        );
        let builder = EncoderCommandBuilder::with_program(
            PathBuf::from("/bin/true"),
            PlatformBackend::V4l2Alsa,
            Arc::new(StaticDeviceEnumerator::empty()),
        );
        let rtsp = Arc::new(RtspSupervisor::new(
            builder,
            RelayMonitor::with_names("definitely-not-a-real-binary", "none"),
            8554,
        ));
        let orchestrator = Orchestrator::new(mjpeg, rtsp);
        let err = orchestrator
            .enable_rtsp("ghost", RtspEnableOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
