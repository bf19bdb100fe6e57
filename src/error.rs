//! Error handling for camstream

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (duplicate camera id, stream mode collision)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Capture device could not be opened
    #[error("Device open failed: {0}")]
    DeviceOpen(String),

    /// Single frame read failed (transient, retried in-loop)
    #[error("Frame acquisition failed: {0}")]
    FrameAcquisition(String),

    /// MJPEG listener port could not be bound after retries
    #[error("Port {port} already in use: {message}")]
    PortInUse { port: u16, message: String },

    /// No RTSP relay listening and none installable
    #[error("RTSP relay unavailable: {0}")]
    RelayUnavailable(String),

    /// External encoder process could not be spawned or died at startup
    #[error("Encoder spawn failed: {0}")]
    EncoderSpawn(String),

    /// OpenCV error
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::DeviceOpen(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DEVICE_OPEN_ERROR",
                msg.clone(),
            ),
            Error::FrameAcquisition(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "FRAME_ACQUISITION_ERROR",
                msg.clone(),
            ),
            Error::PortInUse { port, message } => (
                StatusCode::CONFLICT,
                "PORT_IN_USE",
                format!("port {}: {}", port, message),
            ),
            Error::RelayUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "RELAY_UNAVAILABLE",
                msg.clone(),
            ),
            Error::EncoderSpawn(msg) => (
                StatusCode::BAD_GATEWAY,
                "ENCODER_SPAWN_ERROR",
                msg.clone(),
            ),
            Error::OpenCv(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OPENCV_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
