//! Node-side client for the directory's HTTP/JSON API.
//!
//! A thin wrapper over `reqwest`, one bounded timeout per call, no retries —
//! matching §4.4: the caller (the supervisor or the heartbeat task) decides
//! whether a failure is worth retrying.

use std::time::Duration;

use meshnet_protocol::{HeartbeatRequest, MetricsResponse, PeerInfo, PeersResponse, RegisterRequest};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DirectoryClientError {
    #[error("request to directory timed out or failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not build the {path} URL from the configured base URL: {source}")]
    InvalidUrl {
        path: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("directory rejected the request as invalid: {message}")]
    Validation { message: String },
    #[error("directory has no record of this peer")]
    NotFound,
    #[error("directory returned an unexpected status {status}: {message}")]
    Unexpected { status: StatusCode, message: String },
}

#[derive(Clone)]
pub struct DirectoryClient {
    http: Client,
    base_url: Url,
}

impl DirectoryClient {
    pub fn new(base_url: Url) -> Result<Self, DirectoryClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, DirectoryClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), DirectoryClientError> {
        let url = self
            .base_url
            .join("/register")
            .map_err(|source| DirectoryClientError::InvalidUrl { path: "/register", source })?;
        let response = self.http.post(url).json(request).send().await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::BAD_REQUEST => Err(DirectoryClientError::Validation {
                message: error_message(response).await,
            }),
            status => Err(DirectoryClientError::Unexpected {
                status,
                message: error_message(response).await,
            }),
        }
    }

    pub async fn heartbeat(&self, id: &str) -> Result<(), DirectoryClientError> {
        let url = self
            .base_url
            .join("/heartbeat")
            .map_err(|source| DirectoryClientError::InvalidUrl { path: "/heartbeat", source })?;
        let response = self
            .http
            .post(url)
            .json(&HeartbeatRequest { id: id.to_string() })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::BAD_REQUEST => Err(DirectoryClientError::NotFound),
            status => Err(DirectoryClientError::Unexpected {
                status,
                message: error_message(response).await,
            }),
        }
    }

    /// Fetches active peers, excluding `exclude_id` (normally this node's own id).
    pub async fn list_peers(
        &self,
        exclude_id: &str,
    ) -> Result<Vec<PeerInfo>, DirectoryClientError> {
        let mut url = self
            .base_url
            .join("/peers")
            .map_err(|source| DirectoryClientError::InvalidUrl { path: "/peers", source })?;
        url.query_pairs_mut().append_pair("exclude", exclude_id);

        let response = self.http.get(url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body: PeersResponse = response.json().await?;
                Ok(body.peers)
            }
            status => Err(DirectoryClientError::Unexpected {
                status,
                message: error_message_from_status(status),
            }),
        }
    }

    pub async fn metrics(&self) -> Result<MetricsResponse, DirectoryClientError> {
        let url = self
            .base_url
            .join("/metrics")
            .map_err(|source| DirectoryClientError::InvalidUrl { path: "/metrics", source })?;
        let response = self.http.get(url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(DirectoryClientError::Unexpected {
                status,
                message: error_message_from_status(status),
            }),
        }
    }
}

async fn error_message(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string())
}

fn error_message_from_status(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string()
}
