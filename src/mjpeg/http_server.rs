//! Dedicated per-camera MJPEG listener
//!
//! ## Responsibilities
//!
//! - One HTTP listener per camera on its configured port, independent
//!   of the admin API
//! - `GET /stream` multipart MJPEG endpoint, `GET /` and `/status`
//!   minimal status page
//! - Optional HTTP Basic auth via the camera's injected verifier
//! - Bind retry on a still-occupied port, bounded-shutdown stop

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::auth::decode_basic_auth;
use crate::error::{Error, Result};
use crate::mjpeg::frame_bus::{frame_generator, MULTIPART_CONTENT_TYPE};
use crate::mjpeg::stream::DeviceStream;

const BIND_RETRIES: u32 = 5;
const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct ServerCtx {
    stream: Arc<DeviceStream>,
    placeholder: Bytes,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle on one running per-camera listener.
pub struct StreamHttpServer {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl StreamHttpServer {
    /// Bind `0.0.0.0:mjpeg_port` and start serving. Retries the bind
    /// up to 5 times with 1s backoff while the port drains from a
    /// previous listener.
    pub async fn start(stream: Arc<DeviceStream>, placeholder: Bytes) -> Result<Self> {
        let config = stream.config();
        let port = config.mjpeg_port;
        let camera_id = config.camera_id.clone();

        let listener = bind_with_retry(port, &camera_id).await?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let ctx = ServerCtx {
            stream,
            placeholder,
            shutdown_rx: shutdown_rx.clone(),
        };
        let app = Router::new()
            .route("/", get(status_page))
            .route("/status", get(status_page))
            .route("/stream", get(stream_endpoint))
            .route("/stream/", get(stream_endpoint))
            .with_state(ctx);

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = serve.await {
                tracing::error!(camera_id = %camera_id, error = %e, "Stream listener failed");
            }
        });

        tracing::info!(port = port, "Stream listener started");
        Ok(Self {
            port,
            shutdown_tx,
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signal shutdown, which also ends every in-flight `/stream`
    /// response, then join with a bounded wait; abort the serve task
    /// if it still does not drain. The listener socket is dropped
    /// either way, releasing the port.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(SHUTDOWN_WAIT, &mut self.handle).await {
            Ok(_) => tracing::info!(port = self.port, "Stream listener stopped"),
            Err(_) => {
                tracing::warn!(port = self.port, "Stream listener did not stop in time, aborting");
                self.handle.abort();
            }
        }
    }
}

async fn bind_with_retry(port: u16, camera_id: &str) -> Result<TcpListener> {
    let mut last_err: Option<std::io::Error> = None;
    for attempt in 1..=BIND_RETRIES {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::warn!(
                    camera_id = %camera_id,
                    port = port,
                    attempt = attempt,
                    "Port still in use, retrying bind"
                );
                last_err = Some(e);
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Err(Error::PortInUse {
        port,
        message: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "address in use".to_string()),
    })
}

/// Returns a 401 challenge response when credentials are required and
/// missing or wrong.
fn check_auth(stream: &DeviceStream, headers: &HeaderMap) -> Option<Response> {
    if !stream.config().auth_enabled {
        return None;
    }
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic_auth)
        .map(|(user, pass)| stream.verify_credentials(&user, &pass))
        .unwrap_or(false);
    if authorized {
        None
    } else {
        Some(
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"camstream\"")],
                "unauthorized",
            )
                .into_response(),
        )
    }
}

async fn stream_endpoint(State(ctx): State<ServerCtx>, headers: HeaderMap) -> Response {
    if let Some(denied) = check_auth(&ctx.stream, &headers) {
        return denied;
    }
    let rx = ctx.stream.bus.subscribe();
    // The frame stream is endless; cutting it on the shutdown signal
    // is what lets graceful shutdown complete with clients connected.
    let mut shutdown_rx = ctx.shutdown_rx.clone();
    let frames = frame_generator(rx, ctx.placeholder.clone()).take_until(async move {
        let _ = shutdown_rx.changed().await;
    });
    let body = Body::from_stream(frames);
    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

async fn status_page(State(ctx): State<ServerCtx>, headers: HeaderMap) -> Response {
    if let Some(denied) = check_auth(&ctx.stream, &headers) {
        return denied;
    }
    let status = ctx.stream.status();
    let html = format!(
        "<html><head><title>{id}</title></head><body>\
         <h1>Camera {id}</h1>\
         <p>running: {running}</p>\
         <p>resolution: {resolution}</p>\
         <p>fps: {real_fps:.1} / {fps:.1}</p>\
         <p><a href=\"/stream\">stream</a></p>\
         </body></html>",
        id = status.camera_id,
        running = status.running,
        resolution = status.resolution,
        real_fps = status.real_fps,
        fps = status.fps,
    );
    Html(html).into_response()
}
