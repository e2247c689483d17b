use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /register`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub id: String,
    pub wg_public_key: String,
    pub endpoint_ip: Ipv4Addr,
    pub endpoint_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
}

/// Body of `POST /heartbeat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatRequest {
    pub id: String,
}

/// One entry of `GET /peers`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PeerInfo {
    pub id: String,
    pub wg_public_key: String,
    pub endpoint_ip: Ipv4Addr,
    pub endpoint_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsResponse {
    pub total_peers: u64,
    pub active_peers: u64,
    pub uptime: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
