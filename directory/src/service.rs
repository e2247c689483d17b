//! Validation-backed façade over [`meshnet_storage::Storage`]. HTTP handlers
//! never touch storage directly; they go through here so the 400/500
//! boundary lives in one place.

use std::time::{Duration, Instant};

use chrono::Utc;
use meshnet_protocol::{
    validate_endpoint_port, validate_id, validate_public_key, MetricsResponse, PeerInfo,
    RegisterRequest, ValidationError,
};
use meshnet_storage::{PeerRecord, Storage, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("peer {id} not found: not registered")]
    NotFound { id: String },
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct DirectoryService {
    storage: Storage,
    activity_window: Duration,
    started_at: Instant,
}

impl DirectoryService {
    pub fn new(storage: Storage, activity_window: Duration) -> Self {
        Self {
            storage,
            activity_window,
            started_at: Instant::now(),
        }
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<(), ServiceError> {
        validate_id(&request.id)?;
        validate_public_key(&request.wg_public_key)?;
        validate_endpoint_port(request.endpoint_port)?;

        self.storage.upsert(&PeerRecord {
            id: request.id.clone(),
            wg_public_key: request.wg_public_key.clone(),
            endpoint_ip: request.endpoint_ip,
            endpoint_port: request.endpoint_port,
            last_seen: Utc::now(),
        })?;

        Ok(())
    }

    pub fn list_active(&self, exclude_id: Option<&str>) -> Result<Vec<PeerInfo>, ServiceError> {
        let peers = self
            .storage
            .list_active(self.activity_window)?
            .into_iter()
            .filter(|record| exclude_id != Some(record.id.as_str()))
            .map(record_to_peer_info)
            .collect();

        Ok(peers)
    }

    pub fn heartbeat(&self, id: &str) -> Result<(), ServiceError> {
        self.storage
            .touch(id)
            .map_err(|e| match e {
                StorageError::NotFound(id) => ServiceError::NotFound { id },
                other => ServiceError::Storage(other),
            })
    }

    pub fn metrics(&self) -> Result<MetricsResponse, ServiceError> {
        let day = Duration::from_secs(24 * 60 * 60);

        Ok(MetricsResponse {
            total_peers: self.storage.count_seen_within(day)?,
            active_peers: self.storage.list_active(self.activity_window)?.len() as u64,
            uptime: self.started_at.elapsed().as_secs(),
            timestamp: Utc::now(),
        })
    }
}

fn record_to_peer_info(record: PeerRecord) -> PeerInfo {
    PeerInfo {
        id: record.id,
        wg_public_key: record.wg_public_key,
        endpoint_ip: record.endpoint_ip,
        endpoint_port: record.endpoint_port,
        last_seen: Some(record.last_seen),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn service() -> DirectoryService {
        DirectoryService::new(Storage::open_in_memory().unwrap(), Duration::from_secs(300))
    }

    fn register_request(id: &str) -> RegisterRequest {
        RegisterRequest {
            id: id.to_string(),
            wg_public_key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
            endpoint_ip: Ipv4Addr::new(203, 0, 113, 5),
            endpoint_port: 51820,
        }
    }

    #[test]
    fn register_then_list_active_contains_the_peer() {
        let service = service();
        service.register(&register_request("a")).unwrap();

        let peers = service.list_active(None).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "a");
    }

    #[test]
    fn list_active_excludes_the_requested_id() {
        let service = service();
        service.register(&register_request("a")).unwrap();

        let peers = service.list_active(Some("a")).unwrap();
        assert!(peers.is_empty());
    }

    #[test]
    fn register_rejects_bad_public_key() {
        let service = service();
        let mut request = register_request("a");
        request.wg_public_key = "not-base64!!".to_string();

        assert!(matches!(
            service.register(&request),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn heartbeat_for_unknown_id_is_not_found() {
        let service = service();

        assert!(matches!(
            service.heartbeat("ghost"),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn metrics_counts_registered_peers() {
        let service = service();
        service.register(&register_request("a")).unwrap();
        service.register(&register_request("b")).unwrap();
        service.register(&register_request("c")).unwrap();

        let metrics = service.metrics().unwrap();
        assert!(metrics.total_peers >= 3);
        assert_eq!(metrics.active_peers, 3);
    }
}
