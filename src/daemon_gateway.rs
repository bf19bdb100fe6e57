//! DaemonGateway - motion-detection daemon adapter
//!
//! ## Responsibilities
//!
//! - Health probe against the external motion-detection daemon
//! - Proxy snapshot and stream URLs for cameras the daemon serves
//!
//! The daemon is an opaque network peer; this adapter only shapes
//! requests and reports reachability.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

pub struct DaemonGateway {
    client: reqwest::Client,
    base_url: String,
}

/// Daemon health payload, as much of it as we consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonHealth {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cameras: Option<usize>,
}

impl DaemonGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the daemon's health endpoint.
    pub async fn health(&self) -> Result<DaemonHealth> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Reachability without surfacing the error detail.
    pub async fn is_reachable(&self) -> bool {
        self.health().await.is_ok()
    }

    /// URL of the daemon's own MJPEG stream for a camera.
    pub fn stream_url(&self, camera_id: &str) -> String {
        format!(
            "{}/stream/{}",
            self.base_url,
            urlencoding::encode(camera_id)
        )
    }

    /// One JPEG snapshot fetched through the daemon.
    pub async fn snapshot(&self, camera_id: &str) -> Result<bytes::Bytes> {
        let url = format!(
            "{}/snapshot/{}",
            self.base_url,
            urlencoding::encode(camera_id)
        );
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?)
    }

    /// Open the daemon's live MJPEG stream for relaying to a client.
    pub async fn open_stream(&self, camera_id: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(self.stream_url(camera_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = DaemonGateway::new("http://127.0.0.1:8080/");
        assert_eq!(gateway.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_stream_url_encodes_camera_id() {
        let gateway = DaemonGateway::new("http://127.0.0.1:8080");
        assert_eq!(
            gateway.stream_url("front door"),
            "http://127.0.0.1:8080/stream/front%20door"
        );
    }

    #[tokio::test]
    async fn test_unreachable_daemon_reports_false() {
        let gateway = DaemonGateway::new("http://127.0.0.1:1");
        assert!(!gateway.is_reachable().await);
    }
}
