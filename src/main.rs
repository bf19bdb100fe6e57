//! camstream - camera management and streaming front-end
//!
//! Main entry point.

use camstream::{
    daemon_gateway::DaemonGateway,
    device_enum::{DeviceEnumerator, PlatformDeviceEnumerator},
    mjpeg::{MjpegSupervisor, OpencvBackend},
    orchestrator::Orchestrator,
    rtsp::{command::PlatformBackend, EncoderCommandBuilder, RelayMonitor, RtspSupervisor},
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camstream=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camstream v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        daemon_url = %config.daemon_url,
        rtsp_base_port = config.rtsp_base_port,
        "Loaded configuration"
    );

    let devices: Arc<dyn DeviceEnumerator> =
        Arc::new(PlatformDeviceEnumerator::new(config.ffmpeg_path.clone()));
    let mjpeg = Arc::new(MjpegSupervisor::new(Arc::new(OpencvBackend))?);
    let builder = match config.ffmpeg_path.clone() {
        Some(path) => EncoderCommandBuilder::with_program(
            path,
            PlatformBackend::native(),
            devices.clone(),
        ),
        None => EncoderCommandBuilder::new(devices.clone()),
    };
    let rtsp = Arc::new(RtspSupervisor::new(
        builder,
        RelayMonitor::new(),
        config.rtsp_base_port,
    ));
    let orchestrator = Arc::new(Orchestrator::new(mjpeg.clone(), rtsp.clone()));
    let daemon = Arc::new(DaemonGateway::new(config.daemon_url.clone()));

    let state = AppState {
        config: config.clone(),
        mjpeg: mjpeg.clone(),
        rtsp: rtsp.clone(),
        orchestrator,
        daemon,
        devices,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "Admin API listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop every pipeline and encoder before exit.
    tracing::info!("Shutting down, stopping all streams");
    mjpeg.stop_all().await;
    rtsp.stop_all_streams().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
