//! Outbound side of the peer protocol.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::debug;

use super::PEER_ID_HEADER;
use super::state::SyncMarker;
use super::types::{PeerStatus, SyncRequest};
use crate::sim::policy::Classify;

/// Peer communication failures.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer request timed out: {0}")]
    Timeout(String),
    #[error("could not reach peer: {0}")]
    Connect(String),
    #[error("peer answered with HTTP {0}")]
    Status(u16),
    #[error("malformed peer response: {0}")]
    Malformed(String),
    #[error("no peer configured")]
    Disabled,
    #[error("invalid peer URL \"{0}\"")]
    InvalidUrl(String),
    #[error("could not build HTTP client: {0}")]
    Setup(String),
}

impl Classify for PeerError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Status(_) | Self::Disabled
        )
    }
}

impl From<reqwest::Error> for PeerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status(status.as_u16())
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else if e.is_builder() {
            Self::InvalidUrl(e.url().map_or_else(|| e.to_string(), ToString::to_string))
        } else {
            Self::Connect(e.to_string())
        }
    }
}

/// Link to the counterpart node.
///
/// `fetch_status` reads what the counterpart last reported; `push_status`
/// and `sync` deliver this node's status and sync markers to it.
pub trait PeerLink {
    fn fetch_status(&self) -> impl Future<Output = Result<PeerStatus, PeerError>> + Send;

    fn push_status(
        &self,
        status: &PeerStatus,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;

    fn sync(&self, marker: SyncMarker) -> impl Future<Output = Result<(), PeerError>> + Send;
}

/// [`PeerLink`] over HTTP with bounded timeouts.
#[derive(Debug, Clone)]
pub struct HttpPeerLink {
    client: reqwest::Client,
    /// Counterpart's sync service; `None` when running standalone.
    peer_url: Option<String>,
    /// Sync service the counterpart pushes to (normally this node's own).
    status_url: String,
}

impl HttpPeerLink {
    /// Builds a link identifying itself as `node_id`.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Setup` if `node_id` is not a valid header value or
    /// the client cannot be built.
    pub fn new(
        node_id: &str,
        peer_url: Option<&str>,
        status_url: &str,
        timeout: Duration,
    ) -> Result<Self, PeerError> {
        let mut headers = HeaderMap::new();
        let id = HeaderValue::from_str(node_id).map_err(|e| PeerError::Setup(e.to_string()))?;
        headers.insert(PEER_ID_HEADER, id);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| PeerError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            peer_url: peer_url
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
            status_url: status_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_standalone(&self) -> bool {
        self.peer_url.is_none()
    }

    fn peer_endpoint(&self, path: &str) -> Result<String, PeerError> {
        self.peer_url
            .as_deref()
            .map(|base| format!("{base}{path}"))
            .ok_or(PeerError::Disabled)
    }
}

impl PeerLink for HttpPeerLink {
    async fn fetch_status(&self) -> Result<PeerStatus, PeerError> {
        let url = format!("{}/peer-status", self.status_url);
        let status = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<PeerStatus>()
            .await?;
        Ok(status)
    }

    async fn push_status(&self, status: &PeerStatus) -> Result<(), PeerError> {
        let url = self.peer_endpoint("/peer-status")?;
        self.client
            .post(&url)
            .json(status)
            .send()
            .await?
            .error_for_status()?;
        debug!(%url, "status pushed");
        Ok(())
    }

    async fn sync(&self, marker: SyncMarker) -> Result<(), PeerError> {
        let url = self.peer_endpoint("/sync")?;
        let body = SyncRequest {
            timestamp: marker.to_string(),
        };
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// [`PeerLink`] for a node with no counterpart: every call reports `Disabled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandalonePeer;

impl PeerLink for StandalonePeer {
    async fn fetch_status(&self) -> Result<PeerStatus, PeerError> {
        Err(PeerError::Disabled)
    }

    async fn push_status(&self, _status: &PeerStatus) -> Result<(), PeerError> {
        Err(PeerError::Disabled)
    }

    async fn sync(&self, _marker: SyncMarker) -> Result<(), PeerError> {
        Err(PeerError::Disabled)
    }
}
