//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let daemon_ok = state.daemon.is_reachable().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        encoder_available: state.rtsp.encoder_available(),
        daemon_connected: daemon_ok,
        active_cameras: state.mjpeg.active_count().await,
        active_rtsp_streams: state.rtsp.active_count().await,
    };

    Json(response)
}
