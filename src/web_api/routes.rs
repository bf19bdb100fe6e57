//! API Routes

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::device_enum::DeviceKind;
use crate::error::{Error, Result};
use crate::mjpeg::frame_bus::{frame_generator, MULTIPART_CONTENT_TYPE};
use crate::mjpeg::types::{CameraStreamConfig, CameraUpdate, OverlaySource};
use crate::models::ApiResponse;
use crate::orchestrator::RtspEnableOptions;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/system/status", get(system_status))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras", post(create_camera))
        .route("/api/cameras/:id", get(get_camera))
        .route("/api/cameras/:id", put(update_camera))
        .route("/api/cameras/:id", delete(delete_camera))
        .route("/api/cameras/:id/start", post(start_camera))
        .route("/api/cameras/:id/stop", post(stop_camera))
        .route("/api/cameras/:id/frame.jpg", get(get_frame))
        .route("/api/cameras/:id/stream", get(proxy_stream))
        // RTSP
        .route("/api/cameras/:id/rtsp", post(enable_rtsp))
        .route("/api/cameras/:id/rtsp", delete(disable_rtsp))
        .route("/api/cameras/:id/rtsp", get(rtsp_status))
        .route("/api/rtsp/streams", get(list_rtsp_streams))
        // Devices
        .route("/api/devices", get(list_devices))
        // Daemon
        .route("/api/daemon/health", get(daemon_health))
        .route("/api/daemon/snapshot/:id", get(daemon_snapshot))
        .route("/api/daemon/stream/:id", get(daemon_stream))
        .with_state(state)
}

/// Camera creation payload. Validated here; the supervisor only ever
/// sees well-formed configs.
#[derive(Debug, Deserialize)]
struct CreateCameraRequest {
    camera_id: String,
    display_name: Option<String>,
    device_path: String,
    #[serde(default = "default_width")]
    capture_width: u32,
    #[serde(default = "default_height")]
    capture_height: u32,
    #[serde(default = "default_fps")]
    target_fps: f64,
    #[serde(default = "default_quality")]
    jpeg_quality: i32,
    #[serde(default)]
    output_width: u32,
    #[serde(default)]
    output_height: u32,
    mjpeg_port: u16,
    #[serde(default)]
    auth_enabled: bool,
    #[serde(default)]
    overlay_left: OverlaySource,
    #[serde(default)]
    overlay_right: OverlaySource,
    #[serde(default)]
    overlay_left_text: String,
    #[serde(default)]
    overlay_right_text: String,
    #[serde(default = "default_overlay_scale")]
    overlay_scale: u32,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> f64 {
    15.0
}
fn default_quality() -> i32 {
    80
}
fn default_overlay_scale() -> u32 {
    5
}

impl CreateCameraRequest {
    fn into_config(self) -> Result<CameraStreamConfig> {
        if self.camera_id.trim().is_empty() {
            return Err(Error::Validation("camera_id must not be empty".to_string()));
        }
        if self.device_path.trim().is_empty() {
            return Err(Error::Validation("device_path must not be empty".to_string()));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(Error::Validation(
                "capture dimensions must be non-zero".to_string(),
            ));
        }
        if self.target_fps <= 0.0 {
            return Err(Error::Validation("target_fps must be positive".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Validation(
                "jpeg_quality must be between 1 and 100".to_string(),
            ));
        }
        if !(1..=10).contains(&self.overlay_scale) {
            return Err(Error::Validation(
                "overlay_scale must be between 1 and 10".to_string(),
            ));
        }
        let display_name = self
            .display_name
            .unwrap_or_else(|| format!("Camera {}", self.camera_id));
        Ok(CameraStreamConfig {
            camera_id: self.camera_id,
            display_name,
            device_path: self.device_path,
            capture_width: self.capture_width,
            capture_height: self.capture_height,
            target_fps: self.target_fps,
            jpeg_quality: self.jpeg_quality,
            output_width: self.output_width,
            output_height: self.output_height,
            mjpeg_port: self.mjpeg_port,
            auth_enabled: self.auth_enabled,
            overlay_left: self.overlay_left,
            overlay_right: self.overlay_right,
            overlay_left_text: self.overlay_left_text,
            overlay_right_text: self.overlay_right_text,
            overlay_scale: self.overlay_scale,
        })
    }
}

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.mjpeg.status_all().await))
}

async fn create_camera(
    State(state): State<AppState>,
    Json(req): Json<CreateCameraRequest>,
) -> Result<impl IntoResponse> {
    let config = req.into_config()?;
    let camera_id = config.camera_id.clone();
    state.mjpeg.add(config, None).await?;
    let status = state.mjpeg.status(&camera_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(status))))
}

async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(ApiResponse::success(state.mjpeg.status(&id).await?)))
}

async fn update_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<CameraUpdate>,
) -> Result<impl IntoResponse> {
    if let Some(quality) = update.jpeg_quality {
        if !(1..=100).contains(&quality) {
            return Err(Error::Validation(
                "jpeg_quality must be between 1 and 100".to_string(),
            ));
        }
    }
    if let Some(scale) = update.overlay_scale {
        if !(1..=10).contains(&scale) {
            return Err(Error::Validation(
                "overlay_scale must be between 1 and 10".to_string(),
            ));
        }
    }
    state.mjpeg.update(&id, update).await?;
    Ok(Json(ApiResponse::success(state.mjpeg.status(&id).await?)))
}

async fn delete_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    // Both paths must release the device before deletion.
    state.rtsp.stop_stream(&id).await;
    state.mjpeg.remove(&id).await?;
    Ok(Json(ApiResponse::<()>::success(())))
}

async fn start_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    if state.orchestrator.is_rtsp_authoritative(&id).await {
        return Err(Error::Conflict(format!(
            "camera '{}' is streaming via RTSP; disable it first",
            id
        )));
    }
    state.mjpeg.start(&id).await?;
    Ok(Json(ApiResponse::success(state.mjpeg.status(&id).await?)))
}

async fn stop_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.mjpeg.stop(&id).await?;
    Ok(Json(ApiResponse::success(state.mjpeg.status(&id).await?)))
}

async fn get_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let frame = state.mjpeg.get_frame(&id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        frame,
    ))
}

/// Admin-side MJPEG proxy, sharing the per-camera frame bus with the
/// dedicated listener. Refused while the RTSP path owns the device.
async fn proxy_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    if state.orchestrator.is_rtsp_authoritative(&id).await {
        return Err(Error::Conflict(format!(
            "camera '{}' is streaming via RTSP",
            id
        )));
    }
    let stream = state.mjpeg.device_stream(&id).await?;
    let rx = stream.bus.subscribe();
    let body = Body::from_stream(frame_generator(rx, state.mjpeg.placeholder()));
    Ok((
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    ))
}

async fn enable_rtsp(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(options): Json<RtspEnableOptions>,
) -> Result<impl IntoResponse> {
    let status = state.orchestrator.enable_rtsp(&id, options).await?;
    Ok(Json(ApiResponse::success(status)))
}

#[derive(Debug, Deserialize)]
struct DisableRtspQuery {
    /// Restart the MJPEG pipeline after the encoder stops
    #[serde(default = "default_resume")]
    resume: bool,
}

fn default_resume() -> bool {
    true
}

async fn disable_rtsp(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DisableRtspQuery>,
) -> Result<impl IntoResponse> {
    let stopped = state.orchestrator.disable_rtsp(&id, query.resume).await?;
    Ok(Json(ApiResponse::success(json!({ "stopped": stopped }))))
}

async fn rtsp_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.orchestrator.rtsp_status(&id).await,
    ))
}

async fn list_rtsp_streams(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.rtsp.list_statuses().await))
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    #[serde(default)]
    kind: Option<DeviceKind>,
}

async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> impl IntoResponse {
    let devices = match query.kind {
        Some(kind) => state.devices.list(kind),
        None => {
            let mut devices = state.devices.list(DeviceKind::Video);
            devices.extend(state.devices.list(DeviceKind::Audio));
            devices
        }
    };
    Json(ApiResponse::success(devices))
}

async fn daemon_health(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let health = state.daemon.health().await?;
    Ok(Json(ApiResponse::success(health)))
}

async fn daemon_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let jpeg = state.daemon.snapshot(&id).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg))
}

/// Relay the daemon's own MJPEG stream through the admin API.
async fn daemon_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let upstream = state.daemon.open_stream(&id).await?;
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(MULTIPART_CONTENT_TYPE)
        .to_string();
    let body = Body::from_stream(upstream.bytes_stream());
    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "cpu_usage_percent": sys.global_cpu_usage(),
        "memory_total_bytes": sys.total_memory(),
        "memory_used_bytes": sys.used_memory(),
        "active_cameras": state.mjpeg.active_count().await,
        "active_rtsp_streams": state.rtsp.active_count().await,
        "encoder_available": state.rtsp.encoder_available(),
    }))
}
