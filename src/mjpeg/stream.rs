//! Per-camera runtime state
//!
//! ## Responsibilities
//!
//! - Hold one camera's configuration plus live capture state (last
//!   frame, counters, rolling stats, health)
//! - Own the camera's [`FrameBus`]
//!
//! The capture loop is the only writer of frame/stat fields; config is
//! mutated only through the supervisor under its per-camera operation
//! lock.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use crate::auth::AuthVerifier;
use crate::mjpeg::frame_bus::FrameBus;
use crate::mjpeg::types::{CameraStatus, CameraStreamConfig};

/// The most recent encoded frame, replaced wholesale so readers never
/// observe a torn buffer.
struct FrameRecord {
    data: Bytes,
    at: Instant,
}

/// Rolling 1-second measurement window. Approximate by design: the
/// window rolls on a wall-clock check inside the capture loop, not a
/// timer tick.
struct StatsWindow {
    window_start: Instant,
    frames: u32,
    bytes: u64,
    real_fps: f64,
    bandwidth_kbps: f64,
}

impl StatsWindow {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            bytes: 0,
            real_fps: 0.0,
            bandwidth_kbps: 0.0,
        }
    }

    fn record(&mut self, frame_bytes: usize) {
        self.frames += 1;
        self.bytes += frame_bytes as u64;
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.real_fps = self.frames as f64 / elapsed;
            self.bandwidth_kbps = (self.bytes * 8) as f64 / (elapsed * 1000.0);
            self.window_start = Instant::now();
            self.frames = 0;
            self.bytes = 0;
        }
    }
}

/// One camera's MJPEG pipeline state.
pub struct DeviceStream {
    config: RwLock<CameraStreamConfig>,
    auth_verify: RwLock<Option<AuthVerifier>>,
    pub bus: FrameBus,
    running: AtomicBool,
    last_frame: RwLock<Option<FrameRecord>>,
    frame_count: AtomicU64,
    error: Mutex<Option<String>>,
    // Listener faults live apart from capture faults: a flowing frame
    // must not mask an unbound port.
    listener_error: Mutex<Option<String>>,
    stats: Mutex<StatsWindow>,
}

impl DeviceStream {
    pub fn new(config: CameraStreamConfig) -> Self {
        Self {
            config: RwLock::new(config),
            auth_verify: RwLock::new(None),
            bus: FrameBus::new(),
            running: AtomicBool::new(false),
            last_frame: RwLock::new(None),
            frame_count: AtomicU64::new(0),
            error: Mutex::new(None),
            listener_error: Mutex::new(None),
            stats: Mutex::new(StatsWindow::new()),
        }
    }

    pub fn config(&self) -> CameraStreamConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn update_config(&self, mutate: impl FnOnce(&mut CameraStreamConfig)) {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        mutate(&mut guard);
    }

    pub fn set_auth_verifier(&self, verifier: Option<AuthVerifier>) {
        *self.auth_verify.write().unwrap_or_else(|e| e.into_inner()) = verifier;
    }

    /// Check credentials against the injected callback. Denies when
    /// auth is enabled but no verifier was wired in.
    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let guard = self.auth_verify.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(verify) => verify(username, password),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Publish one encoded frame: swap `last_frame`, bump counters,
    /// roll stats, clear any transient error, fan out to subscribers.
    pub fn record_frame(&self, frame: Bytes) {
        let size = frame.len();
        {
            let mut guard = self.last_frame.write().unwrap_or_else(|e| e.into_inner());
            *guard = Some(FrameRecord {
                data: frame.clone(),
                at: Instant::now(),
            });
        }
        self.frame_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(size);
        self.clear_error();
        self.bus.publish(frame);
    }

    pub fn last_frame(&self) -> Option<Bytes> {
        self.last_frame
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|record| record.data.clone())
    }

    pub fn last_frame_age(&self) -> Option<std::time::Duration> {
        self.last_frame
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|record| record.at.elapsed())
    }

    /// Drop the buffered frame, so status/frame reads after a stop
    /// fall back to the placeholder immediately.
    pub fn clear_last_frame(&self) {
        *self.last_frame.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    pub fn clear_error(&self) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            *guard = None;
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record a dedicated-listener fault. Unlike capture errors this is
    /// not cleared by `record_frame`; only the supervisor clears it
    /// when the listener binds or the pipeline stops.
    pub fn set_listener_error(&self, message: impl Into<String>) {
        *self.listener_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    pub fn clear_listener_error(&self) {
        *self.listener_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn listener_error(&self) -> Option<String> {
        self.listener_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Read-only projection for the status surface.
    pub fn status(&self) -> CameraStatus {
        let config = self.config();
        let (width, height) = config.output_size();
        let (real_fps, bandwidth_kbps) = {
            let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            (stats.real_fps, stats.bandwidth_kbps)
        };
        CameraStatus {
            camera_id: config.camera_id.clone(),
            running: self.is_running(),
            resolution: format!("{}x{}", width, height),
            fps: config.target_fps,
            real_fps: round1(real_fps),
            bandwidth_kbps: round1(bandwidth_kbps),
            frame_count: self.frame_count(),
            mjpeg_port: config.mjpeg_port,
            error: self.listener_error().or_else(|| self.error()),
            subscriber_count: self.bus.subscriber_count(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
