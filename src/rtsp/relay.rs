//! RTSP relay availability
//!
//! ## Responsibilities
//!
//! - Probe whether the relay (MediaMTX) is listening on an ingest port
//! - When the relay binary is installed but dormant, try to bring it up
//!   via the service manager and poll briefly for the port to go live

use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const STARTUP_POLLS: u32 = 10;
const STARTUP_POLL_DELAY: Duration = Duration::from_millis(500);

pub struct RelayMonitor {
    binary_name: String,
    service_name: String,
    host: String,
}

impl RelayMonitor {
    pub fn new() -> Self {
        Self {
            binary_name: "mediamtx".to_string(),
            service_name: "mediamtx".to_string(),
            host: "127.0.0.1".to_string(),
        }
    }

    /// Custom names, for configuration and tests.
    pub fn with_names(binary_name: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            service_name: service_name.into(),
            host: "127.0.0.1".to_string(),
        }
    }

    /// Short-timeout TCP connect: is anything listening on the port?
    pub async fn probe(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((self.host.as_str(), port)))
                .await,
            Ok(Ok(_))
        )
    }

    /// Is the relay binary present on this machine?
    pub fn is_installed(&self) -> bool {
        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                if dir.join(&self.binary_name).is_file() {
                    return true;
                }
            }
        }
        ["/usr/local/bin", "/usr/bin", "/opt/mediamtx"]
            .iter()
            .any(|dir| Path::new(dir).join(&self.binary_name).is_file())
    }

    /// Ensure a listener exists on `port` before an encoder push is
    /// attempted. Fails fast with an actionable message when the relay
    /// is neither listening nor installable into a running state.
    pub async fn ensure_ready(&self, port: u16) -> Result<()> {
        if self.probe(port).await {
            return Ok(());
        }

        if !self.is_installed() {
            return Err(Error::RelayUnavailable(format!(
                "no RTSP relay listening on port {} and '{}' is not installed; \
                 install it and enable the '{}' service",
                port, self.binary_name, self.service_name
            )));
        }

        tracing::info!(service = %self.service_name, port = port, "Relay installed but not listening, attempting service start");
        self.try_service_start().await;

        for _ in 0..STARTUP_POLLS {
            if self.probe(port).await {
                return Ok(());
            }
            tokio::time::sleep(STARTUP_POLL_DELAY).await;
        }

        Err(Error::RelayUnavailable(format!(
            "'{}' is installed but did not start listening on port {}; \
             check the '{}' service logs",
            self.binary_name, port, self.service_name
        )))
    }

    #[cfg(unix)]
    async fn try_service_start(&self) {
        match tokio::process::Command::new("systemctl")
            .args(["start", &self.service_name])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                tracing::info!(service = %self.service_name, "Relay service start issued");
            }
            Ok(output) => {
                tracing::warn!(
                    service = %self.service_name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Relay service start failed"
                );
            }
            Err(e) => {
                tracing::warn!(service = %self.service_name, error = %e, "Could not invoke service manager");
            }
        }
    }

    #[cfg(not(unix))]
    async fn try_service_start(&self) {
        tracing::warn!(service = %self.service_name, "No service manager integration on this platform");
    }
}

impl Default for RelayMonitor {
    fn default() -> Self {
        Self::new()
    }
}
