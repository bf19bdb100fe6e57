//! MJPEG pipeline registry and lifecycle orchestration
//!
//! ## Responsibilities
//!
//! - camera_id -> DeviceStream registry: add/remove/start/stop/update
//! - Launch order: HTTP listener first, then the capture thread
//! - Serialize start/stop per camera so a start can never race a stop
//!   into two live capture threads or a double-bound socket
//! - Faults stay contained per camera; one broken device never touches
//!   its siblings

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::auth::AuthVerifier;
use crate::error::{Error, Result};
use crate::mjpeg::capture::{capture_loop, CaptureBackend};
use crate::mjpeg::frame_bus::render_placeholder;
use crate::mjpeg::http_server::StreamHttpServer;
use crate::mjpeg::stream::DeviceStream;
use crate::mjpeg::types::{CameraStatus, CameraStreamConfig, CameraUpdate};

/// Bounded wait for the capture thread to exit after a stop signal.
const CAPTURE_JOIN_WAIT: Duration = Duration::from_secs(2);

struct CameraRuntime {
    stop: Arc<AtomicBool>,
    capture: std::thread::JoinHandle<()>,
    http: Option<StreamHttpServer>,
}

struct CameraEntry {
    stream: Arc<DeviceStream>,
    runtime: Mutex<Option<CameraRuntime>>,
}

/// Registry and lifecycle supervisor for all MJPEG pipelines.
pub struct MjpegSupervisor {
    cameras: RwLock<HashMap<String, Arc<CameraEntry>>>,
    op_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    backend: Arc<dyn CaptureBackend>,
    placeholder: Bytes,
}

impl MjpegSupervisor {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Result<Self> {
        let placeholder = render_placeholder(640, 480, "NO SIGNAL")?;
        Ok(Self {
            cameras: RwLock::new(HashMap::new()),
            op_locks: RwLock::new(HashMap::new()),
            backend,
            placeholder,
        })
    }

    /// The shared "no signal" JPEG.
    pub fn placeholder(&self) -> Bytes {
        self.placeholder.clone()
    }

    /// Register a camera. Fails with a conflict if the id is taken.
    pub async fn add(
        &self,
        config: CameraStreamConfig,
        auth_verify: Option<AuthVerifier>,
    ) -> Result<()> {
        let camera_id = config.camera_id.clone();
        let mut cameras = self.cameras.write().await;
        if cameras.contains_key(&camera_id) {
            return Err(Error::Conflict(format!(
                "camera '{}' already registered",
                camera_id
            )));
        }
        let stream = Arc::new(DeviceStream::new(config));
        stream.set_auth_verifier(auth_verify);
        cameras.insert(
            camera_id.clone(),
            Arc::new(CameraEntry {
                stream,
                runtime: Mutex::new(None),
            }),
        );
        tracing::info!(camera_id = %camera_id, "Camera registered");
        Ok(())
    }

    /// Stop and delete a camera.
    pub async fn remove(&self, camera_id: &str) -> Result<()> {
        let lock = self.get_or_create_lock(camera_id).await;
        let _guard = lock.lock().await;

        let entry = self.entry(camera_id).await?;
        self.stop_entry(camera_id, &entry).await;
        self.cameras.write().await.remove(camera_id);
        self.op_locks.write().await.remove(camera_id);
        tracing::info!(camera_id = %camera_id, "Camera removed");
        Ok(())
    }

    /// Start a camera's pipeline. Idempotent: starting a running
    /// camera is a successful no-op.
    pub async fn start(&self, camera_id: &str) -> Result<()> {
        let lock = self.get_or_create_lock(camera_id).await;
        let _guard = lock.lock().await;

        let entry = self.entry(camera_id).await?;
        self.start_entry(camera_id, &entry).await
    }

    /// Stop a camera's pipeline. Idempotent.
    pub async fn stop(&self, camera_id: &str) -> Result<()> {
        let lock = self.get_or_create_lock(camera_id).await;
        let _guard = lock.lock().await;

        let entry = self.entry(camera_id).await?;
        self.stop_entry(camera_id, &entry).await;
        Ok(())
    }

    /// Apply a partial config update. Overlay-only changes apply live;
    /// capture/output/network changes restart the pipeline when it was
    /// running.
    pub async fn update(&self, camera_id: &str, update: CameraUpdate) -> Result<()> {
        let lock = self.get_or_create_lock(camera_id).await;
        let _guard = lock.lock().await;

        let entry = self.entry(camera_id).await?;
        if !update.requires_restart() {
            entry.stream.update_config(|config| update.apply_to(config));
            tracing::debug!(camera_id = %camera_id, "Overlay config applied live");
            return Ok(());
        }

        let was_running = entry.runtime.lock().await.is_some();
        if was_running {
            self.stop_entry(camera_id, &entry).await;
        }
        entry.stream.update_config(|config| update.apply_to(config));
        if was_running {
            self.start_entry(camera_id, &entry).await?;
        }
        tracing::info!(camera_id = %camera_id, restarted = was_running, "Camera config updated");
        Ok(())
    }

    pub async fn status(&self, camera_id: &str) -> Result<CameraStatus> {
        Ok(self.entry(camera_id).await?.stream.status())
    }

    pub async fn status_all(&self) -> Vec<CameraStatus> {
        let cameras = self.cameras.read().await;
        cameras.values().map(|entry| entry.stream.status()).collect()
    }

    pub async fn contains(&self, camera_id: &str) -> bool {
        self.cameras.read().await.contains_key(camera_id)
    }

    pub async fn is_running(&self, camera_id: &str) -> bool {
        match self.cameras.read().await.get(camera_id) {
            Some(entry) => entry.stream.is_running(),
            None => false,
        }
    }

    pub async fn active_count(&self) -> usize {
        let cameras = self.cameras.read().await;
        cameras
            .values()
            .filter(|entry| entry.stream.is_running())
            .count()
    }

    /// Latest encoded frame, or the placeholder when none is buffered.
    pub async fn get_frame(&self, camera_id: &str) -> Result<Bytes> {
        let entry = self.entry(camera_id).await?;
        Ok(entry
            .stream
            .last_frame()
            .unwrap_or_else(|| self.placeholder.clone()))
    }

    pub async fn device_stream(&self, camera_id: &str) -> Result<Arc<DeviceStream>> {
        Ok(self.entry(camera_id).await?.stream.clone())
    }

    /// Stop every registered camera; used at shutdown.
    pub async fn stop_all(&self) {
        let camera_ids: Vec<String> = self.cameras.read().await.keys().cloned().collect();
        for camera_id in camera_ids {
            if let Err(e) = self.stop(&camera_id).await {
                tracing::warn!(camera_id = %camera_id, error = %e, "Stop during shutdown failed");
            }
        }
    }

    async fn entry(&self, camera_id: &str) -> Result<Arc<CameraEntry>> {
        self.cameras
            .read()
            .await
            .get(camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("camera '{}'", camera_id)))
    }

    async fn start_entry(&self, camera_id: &str, entry: &CameraEntry) -> Result<()> {
        let mut runtime = entry.runtime.lock().await;
        if runtime.is_some() {
            tracing::debug!(camera_id = %camera_id, "Start requested but already running");
            return Ok(());
        }

        // Listener first so the endpoint exists before frames flow. A
        // bind failure is recorded but does not block capture: frames
        // still reach the bus and the admin proxy.
        let http = match StreamHttpServer::start(entry.stream.clone(), self.placeholder.clone())
            .await
        {
            Ok(server) => {
                entry.stream.clear_listener_error();
                Some(server)
            }
            Err(e) => {
                tracing::error!(camera_id = %camera_id, error = %e, "Stream listener start failed");
                entry.stream.set_listener_error(e.to_string());
                None
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let capture = {
            let stream = entry.stream.clone();
            let backend = self.backend.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("capture-{}", camera_id))
                .spawn(move || capture_loop(stream, backend, stop))
                .map_err(Error::Io)?
        };

        *runtime = Some(CameraRuntime {
            stop,
            capture,
            http,
        });
        tracing::info!(camera_id = %camera_id, "Camera pipeline started");
        Ok(())
    }

    async fn stop_entry(&self, camera_id: &str, entry: &CameraEntry) {
        let taken = entry.runtime.lock().await.take();
        let Some(runtime) = taken else {
            return;
        };

        if let Some(http) = runtime.http {
            http.stop().await;
        }

        runtime.stop.store(true, Ordering::SeqCst);
        let capture = runtime.capture;
        let join = tokio::task::spawn_blocking(move || capture.join());
        if tokio::time::timeout(CAPTURE_JOIN_WAIT, join).await.is_err() {
            tracing::warn!(camera_id = %camera_id, "Capture thread did not exit in time");
        }

        entry.stream.set_running(false);
        entry.stream.clear_last_frame();
        entry.stream.clear_listener_error();
        tracing::info!(camera_id = %camera_id, "Camera pipeline stopped");
    }

    async fn get_or_create_lock(&self, camera_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.op_locks.read().await;
            if let Some(lock) = locks.get(camera_id) {
                return lock.clone();
            }
        }
        let mut locks = self.op_locks.write().await;
        locks
            .entry(camera_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mjpeg::capture::TestPatternBackend;
    use crate::mjpeg::types::OverlaySource;

    fn config(camera_id: &str, port: u16) -> CameraStreamConfig {
        CameraStreamConfig {
            camera_id: camera_id.to_string(),
            display_name: format!("Camera {}", camera_id),
            device_path: "0".to_string(),
            capture_width: 320,
            capture_height: 240,
            target_fps: 30.0,
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

    fn supervisor() -> MjpegSupervisor {
        MjpegSupervisor::new(Arc::new(TestPatternBackend::new())).unwrap()
    }

    #[tokio::test]
    async fn test_add_duplicate_conflicts() {
        let sup = supervisor();
        sup.add(config("a", 19401), None).await.unwrap();
        let err = sup.add(config("a", 19402), None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let sup = supervisor();
        sup.add(config("a", 19403), None).await.unwrap();
        sup.start("a").await.unwrap();
        sup.start("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sup.is_running("a").await);
        sup.stop("a").await.unwrap();
        assert!(!sup.is_running("a").await);
    }

    #[tokio::test]
    async fn test_unknown_camera_is_not_found() {
        let sup = supervisor();
        assert!(matches!(
            sup.start("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            sup.status("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_device_fault_isolated_per_camera() {
        let sup = supervisor();
        sup.add(config("good", 19404), None).await.unwrap();
        let mut bad = config("bad", 19405);
        bad.device_path = "fail".to_string();
        sup.add(bad, None).await.unwrap();

        sup.start("good").await.unwrap();
        sup.start("bad").await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let good = sup.status("good").await.unwrap();
        assert!(good.running);
        assert!(good.frame_count > 0);

        let bad = sup.status("bad").await.unwrap();
        assert!(!bad.running);
        assert!(bad.error.unwrap().contains("open failure"));

        sup.stop_all().await;
    }

    #[tokio::test]
    async fn test_overlay_update_applies_without_restart() {
        let sup = supervisor();
        sup.add(config("a", 19406), None).await.unwrap();
        sup.start("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let before = sup.status("a").await.unwrap().frame_count;

        sup.update(
            "a",
            CameraUpdate {
                overlay_left: Some(OverlaySource::Custom),
                overlay_left_text: Some("lobby".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Still the same pipeline, still producing.
        assert!(sup.is_running("a").await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sup.status("a").await.unwrap().frame_count > before);
        sup.stop("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_fps_update_restarts_running_pipeline() {
        let sup = supervisor();
        sup.add(config("a", 19407), None).await.unwrap();
        sup.start("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        sup.update(
            "a",
            CameraUpdate {
                target_fps: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = sup.status("a").await.unwrap();
        assert!(status.running);
        assert_eq!(status.fps, 10.0);
        sup.stop("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_frame_falls_back_to_placeholder() {
        let sup = supervisor();
        sup.add(config("a", 19408), None).await.unwrap();
        let frame = sup.get_frame("a").await.unwrap();
        assert_eq!(frame, sup.placeholder());
    }

    #[tokio::test]
    async fn test_remove_stops_and_deletes() {
        let sup = supervisor();
        sup.add(config("a", 19409), None).await.unwrap();
        sup.start("a").await.unwrap();
        sup.remove("a").await.unwrap();
        assert!(!sup.contains("a").await);
    }
}
