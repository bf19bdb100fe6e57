//! External encoder supervision
//!
//! ## Responsibilities
//!
//! - One encoder process per camera: preflight (binary + relay), spawn,
//!   settle check, graceful/forceful stop
//! - Lazy status reconciliation: every read re-checks actual process
//!   liveness, so out-of-band deaths are observed without a callback
//! - Per-camera operation lock: start/stop for the same camera never
//!   overlap, so two encoders cannot hold one device
//! - Deterministic ingest-port assignment per camera id
//!
//! Failed starts never leave a half-started process tracked; a crash is
//! surfaced through `status().error`, never auto-restarted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::rtsp::command::EncoderCommandBuilder;
use crate::rtsp::process::ProcessHandle;
use crate::rtsp::relay::RelayMonitor;
use crate::rtsp::types::{RtspStreamConfig, RtspStreamStatus};

/// Wait after spawn before declaring the process stable.
const SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Graceful termination window before escalating.
const GRACEFUL_WAIT: Duration = Duration::from_secs(5);
/// Window after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

struct TrackedStream {
    handle: ProcessHandle,
    status: RtspStreamStatus,
}

pub struct RtspSupervisor {
    builder: EncoderCommandBuilder,
    relay: RelayMonitor,
    base_port: u16,
    tracked: Mutex<HashMap<String, TrackedStream>>,
    op_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl RtspSupervisor {
    pub fn new(builder: EncoderCommandBuilder, relay: RelayMonitor, base_port: u16) -> Self {
        Self {
            builder,
            relay,
            base_port,
            tracked: Mutex::new(HashMap::new()),
            op_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn encoder_available(&self) -> bool {
        self.builder.is_available()
    }

    /// Deterministic ingest port for a camera: numeric ids map onto a
    /// contiguous block from the base port; non-numeric ids, and
    /// numeric ids whose block position would run past u16::MAX, hash
    /// into a 100-port window. Repeatable across restarts,
    /// collision-tolerant rather than collision-free.
    pub fn port_for_camera(&self, camera_id: &str) -> u16 {
        if let Ok(n) = camera_id.parse::<u16>() {
            if n >= 1 {
                if let Some(port) = self.base_port.checked_add(n - 1) {
                    return port;
                }
            }
        }
        self.base_port
            .saturating_add((stable_hash(camera_id) % 100) as u16)
    }

    /// Start (or restart) the encoder for one camera. Failures are
    /// reported in the returned status, never as a tracked half-start.
    pub async fn start_stream(&self, config: RtspStreamConfig) -> RtspStreamStatus {
        let camera_id = config.camera_id.clone();
        let lock = self.get_or_create_lock(&camera_id).await;
        let _guard = lock.lock().await;

        self.stop_tracked(&camera_id).await;

        if !self.builder.is_available() {
            return self.fail(
                &camera_id,
                "ffmpeg executable not found; install ffmpeg and ensure it is on PATH",
            );
        }
        if let Err(e) = self.relay.ensure_ready(config.port).await {
            return self.fail(&camera_id, e.to_string());
        }

        let invocation = match self.builder.build(&config) {
            Ok(inv) => inv,
            Err(e) => return self.fail(&camera_id, e.to_string()),
        };
        tracing::debug!(
            camera_id = %camera_id,
            program = %invocation.program.display(),
            args = %invocation.args.join(" "),
            "Spawning encoder"
        );

        let mut handle = match ProcessHandle::spawn(&invocation.program, &invocation.args) {
            Ok(h) => h,
            Err(e) => return self.fail(&camera_id, e.to_string()),
        };

        // Settle: an encoder that dies within the first second failed
        // to open its device or reach the relay.
        tokio::time::sleep(SETTLE_DELAY).await;
        if !handle.is_alive() {
            let stderr = handle.stderr_tail();
            let detail = if stderr.is_empty() {
                "encoder exited immediately after start".to_string()
            } else {
                format!("encoder exited immediately after start: {}", stderr)
            };
            return self.fail(&camera_id, detail);
        }

        let status = RtspStreamStatus {
            camera_id: camera_id.clone(),
            is_running: true,
            stream_url: Some(format!("rtsp://127.0.0.1:{}{}", config.port, config.path)),
            has_audio: invocation.has_audio,
            error: None,
            pid: handle.pid(),
            started_at: Some(Utc::now()),
            low_confidence_device_match: invocation.low_confidence,
        };
        tracing::info!(
            camera_id = %camera_id,
            pid = ?handle.pid(),
            port = config.port,
            "Encoder running"
        );

        self.tracked.lock().await.insert(
            camera_id,
            TrackedStream {
                handle,
                status: status.clone(),
            },
        );
        status
    }

    /// Stop one camera's encoder: graceful terminate, bounded wait,
    /// forced kill. The tracking entry is removed no matter how
    /// termination goes. Returns false when nothing was tracked.
    pub async fn stop_stream(&self, camera_id: &str) -> bool {
        let lock = self.get_or_create_lock(camera_id).await;
        let _guard = lock.lock().await;
        self.stop_tracked(camera_id).await
    }

    async fn stop_tracked(&self, camera_id: &str) -> bool {
        // Popping first guarantees the entry is gone even if the
        // process refuses to die.
        let entry = self.tracked.lock().await.remove(camera_id);
        let Some(mut entry) = entry else {
            return false;
        };

        entry.handle.terminate();
        if !entry.handle.wait_timeout(GRACEFUL_WAIT).await {
            tracing::warn!(camera_id = %camera_id, "Encoder ignored terminate, killing");
            entry.handle.kill();
            if !entry.handle.wait_timeout(KILL_WAIT).await {
                tracing::error!(camera_id = %camera_id, "Encoder did not die after kill");
            }
        }
        tracing::info!(camera_id = %camera_id, "Encoder stopped");
        true
    }

    /// Current status, reconciled against actual process liveness.
    /// A process found dead is untracked here and its stderr harvested.
    pub async fn get_stream_status(&self, camera_id: &str) -> RtspStreamStatus {
        let mut tracked = self.tracked.lock().await;
        let Some(entry) = tracked.get_mut(camera_id) else {
            return RtspStreamStatus::stopped(camera_id);
        };

        if entry.handle.is_alive() {
            return entry.status.clone();
        }

        let stderr = entry.handle.stderr_tail();
        let detail = if stderr.is_empty() {
            "encoder process exited unexpectedly".to_string()
        } else {
            format!("encoder process exited unexpectedly: {}", stderr)
        };
        tracing::warn!(camera_id = %camera_id, "Tracked encoder found dead on status read");
        tracked.remove(camera_id);
        RtspStreamStatus::failed(camera_id, detail)
    }

    /// Reconciled statuses for every tracked camera.
    pub async fn list_statuses(&self) -> Vec<RtspStreamStatus> {
        let camera_ids: Vec<String> = self.tracked.lock().await.keys().cloned().collect();
        let mut statuses = Vec::with_capacity(camera_ids.len());
        for camera_id in camera_ids {
            statuses.push(self.get_stream_status(&camera_id).await);
        }
        statuses
    }

    pub async fn is_active(&self, camera_id: &str) -> bool {
        self.get_stream_status(camera_id).await.is_running
    }

    pub async fn active_count(&self) -> usize {
        self.list_statuses()
            .await
            .iter()
            .filter(|s| s.is_running)
            .count()
    }

    /// Stop everything; individual failures never abort the sweep.
    pub async fn stop_all_streams(&self) {
        let camera_ids: Vec<String> = self.tracked.lock().await.keys().cloned().collect();
        for camera_id in camera_ids {
            self.stop_stream(&camera_id).await;
        }
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

    fn fail(&self, camera_id: &str, detail: impl Into<String>) -> RtspStreamStatus {
        let detail = detail.into();
        tracing::error!(camera_id = %camera_id, error = %detail, "Encoder start failed");
        RtspStreamStatus::failed(camera_id, detail)
    }
}

/// FNV-1a. Stable across runs, unlike the default hasher.
fn stable_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_enum::StaticDeviceEnumerator;
    use crate::rtsp::command::PlatformBackend;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn supervisor_with(program: PathBuf) -> RtspSupervisor {
        let builder = EncoderCommandBuilder::with_program(
            program,
            PlatformBackend::V4l2Alsa,
            Arc::new(StaticDeviceEnumerator::empty()),
        );
        let relay = RelayMonitor::with_names("definitely-not-a-real-binary", "none");
        RtspSupervisor::new(builder, relay, 8554)
    }

    fn config(camera_id: &str, port: u16) -> RtspStreamConfig {
        RtspStreamConfig {
            camera_id: camera_id.to_string(),
            device_path: "0".to_string(),
            display_name: "Cam".to_string(),
            resolution: "640x480".to_string(),
            framerate: 15,
            video_bitrate: 1000,
            audio: None,
            port,
            path: format!("/cam{}", camera_id),
        }
    }

    #[cfg(unix)]
    fn fake_encoder(name: &str, script_body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = std::env::temp_dir().join(format!("camstream-fake-encoder-{}", name));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_port_assignment_numeric() {
        let sup = supervisor_with(PathBuf::from("/usr/bin/ffmpeg"));
        assert_eq!(sup.port_for_camera("1"), 8554);
        assert_eq!(sup.port_for_camera("3"), 8556);
    }

    #[test]
    fn test_port_assignment_numeric_overflow_falls_back_to_hash() {
        let sup = supervisor_with(PathBuf::from("/usr/bin/ffmpeg"));
        // 8554 + 60000 - 1 would not fit a u16.
        let port = sup.port_for_camera("60000");
        assert!(port >= 8554 && port < 8554 + 100);
        assert_eq!(port, sup.port_for_camera("60000"));
        assert_eq!(sup.port_for_camera("65535"), sup.port_for_camera("65535"));
    }

    #[test]
    fn test_port_assignment_non_numeric_is_stable() {
        let sup = supervisor_with(PathBuf::from("/usr/bin/ffmpeg"));
        let port = sup.port_for_camera("abc");
        assert!(port >= 8554 && port < 8554 + 100);
        assert_eq!(port, sup.port_for_camera("abc"));
    }

    #[tokio::test]
    async fn test_start_without_relay_fails_untracked() {
        let sup = supervisor_with(PathBuf::from("/bin/true"));
        // Momentarily-free port, nothing listening.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let status = sup.start_stream(config("1", port)).await;
        assert!(!status.is_running);
        assert!(status.error.as_ref().unwrap().contains("relay"));

        let status = sup.get_stream_status("1").await;
        assert!(!status.is_running);
        assert!(sup.list_statuses().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_lifecycle_with_fake_encoder() {
        let encoder = fake_encoder("lifecycle", "sleep 30");
        let sup = supervisor_with(encoder);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = sup.start_stream(config("1", port)).await;
        assert!(status.is_running, "error: {:?}", status.error);
        assert!(status.pid.is_some());
        assert_eq!(
            status.stream_url.as_deref(),
            Some(format!("rtsp://127.0.0.1:{}/cam1", port).as_str())
        );

        assert!(sup.is_active("1").await);
        assert!(sup.stop_stream("1").await);
        assert!(!sup.is_active("1").await);
        assert!(!sup.stop_stream("1").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_settle_check_catches_immediate_exit() {
        let encoder = fake_encoder("settle", "echo cannot open device >&2; exit 1");
        let sup = supervisor_with(encoder);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = sup.start_stream(config("2", port)).await;
        assert!(!status.is_running);
        assert!(status.error.as_ref().unwrap().contains("cannot open device"));
        assert!(sup.list_statuses().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_out_of_band_death_reconciled_on_read() {
        let encoder = fake_encoder("reconcile", "sleep 30");
        let sup = supervisor_with(encoder);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let status = sup.start_stream(config("3", port)).await;
        assert!(status.is_running);
        let pid = status.pid.unwrap();
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = sup.get_stream_status("3").await;
        assert!(!status.is_running);
        assert!(status.error.is_some());
        // Entry dropped: a second read reports plain stopped.
        let status = sup.get_stream_status("3").await;
        assert!(!status.is_running);
        assert!(status.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_starts_for_one_camera_serialize() {
        let encoder = fake_encoder("serialize", "sleep 30");
        let sup = Arc::new(supervisor_with(encoder));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let began = std::time::Instant::now();
        let (a, b) = tokio::join!(
            sup.start_stream(config("7", port)),
            sup.start_stream(config("7", port)),
        );
        // Both starts succeed, but one fully stops the other's process
        // before spawning its own, so the settle delays do not overlap.
        assert!(a.is_running && b.is_running);
        assert_ne!(a.pid, b.pid);
        assert!(began.elapsed() >= SETTLE_DELAY * 2);
        assert_eq!(sup.list_statuses().await.len(), 1);
        sup.stop_all_streams().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_all_sweeps_every_stream() {
        let encoder = fake_encoder("sweep", "sleep 30");
        let sup = supervisor_with(encoder);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        sup.start_stream(config("1", port)).await;
        sup.start_stream(config("2", port)).await;
        assert_eq!(sup.active_count().await, 2);
        sup.stop_all_streams().await;
        assert_eq!(sup.active_count().await, 0);
    }
}
