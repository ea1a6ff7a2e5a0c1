//! Client for the upstream capture control API
//!
//! The telemetry service exposes a packet-capture toggle under
//! `/api/sniffer/*` and its deployment identity under `/api/config`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors talking to the control API
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Control request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected control reply: {0}")]
    UnexpectedReply(String),
}

/// Capture state reported by the upstream service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub active: bool,
}

/// Upstream deployment identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub node_name: String,
}

#[derive(Deserialize)]
struct ToggleReply {
    status: String,
}

/// Map a toggle reply to the resulting capture state
fn capture_state(status: &str) -> Result<bool, CaptureError> {
    match status {
        "activated" | "already_active" => Ok(true),
        "deactivated" => Ok(false),
        other => Err(CaptureError::UnexpectedReply(other.to_string())),
    }
}

/// HTTP client for one upstream service
#[derive(Clone, Debug)]
pub struct CaptureClient {
    http: reqwest::Client,
    base_url: String,
}

impl CaptureClient {
    /// Client for the service at `base_url` (e.g. `http://10.0.0.5:11070`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, CaptureError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Whether capture is currently running
    pub async fn status(&self) -> Result<CaptureStatus, CaptureError> {
        let status = self
            .http
            .get(self.url("/api/sniffer/status"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }

    /// Turn capture on. Returns the resulting state.
    pub async fn enable(&self) -> Result<bool, CaptureError> {
        self.toggle("/api/sniffer/enable").await
    }

    /// Turn capture off. Returns the resulting state.
    pub async fn disable(&self) -> Result<bool, CaptureError> {
        self.toggle("/api/sniffer/disable").await
    }

    async fn toggle(&self, path: &str) -> Result<bool, CaptureError> {
        let reply: ToggleReply = self
            .http
            .post(self.url(path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let active = capture_state(&reply.status)?;
        tracing::info!(active, "Capture toggled");
        Ok(active)
    }

    /// Version and node name of the upstream deployment
    pub async fn deployment(&self) -> Result<Deployment, CaptureError> {
        let deployment = self
            .http
            .get(self.url("/api/config"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_state_mapping() {
        assert!(capture_state("activated").unwrap());
        assert!(capture_state("already_active").unwrap());
        assert!(!capture_state("deactivated").unwrap());
        assert!(matches!(
            capture_state("exploded"),
            Err(CaptureError::UnexpectedReply(_))
        ));
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = CaptureClient::new("http://127.0.0.1:11070/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:11070");
        assert_eq!(
            client.url("/api/sniffer/status"),
            "http://127.0.0.1:11070/api/sniffer/status"
        );
    }

    #[test]
    fn test_deployment_deserializes() {
        let json = r#"{"version": "4.0.1", "node_name": "edge-01"}"#;
        let deployment: Deployment = serde_json::from_str(json).unwrap();
        assert_eq!(deployment.node_name, "edge-01");

        let partial: Deployment = serde_json::from_str("{}").unwrap();
        assert!(partial.version.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error() {
        let client = CaptureClient::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(client.status().await, Err(CaptureError::Http(_))));
    }
}
