//! Adapter over the host's WireGuard implementation (§4.6).
//!
//! `TunnelEngine` is the seam: the supervisor and its tests depend on the
//! trait, never on a concrete engine. The shipped implementation drives the
//! kernel WireGuard module through `wireguard-control`, the crate
//! `innernet-server` uses for the same purpose.

use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

mod wireguard_control_engine;

pub use wireguard_control_engine::WireguardControlEngine;

/// Fixed per §4.6: persistent keepalive is mandatory, not configurable.
pub const PERSISTENT_KEEPALIVE: u16 = 25;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to bring up interface {interface}: {reason}")]
    InterfaceUp { interface: String, reason: String },
    #[error("failed to configure peer {public_key_b64} on {interface}: {reason}")]
    PeerConfig {
        interface: String,
        public_key_b64: String,
        reason: String,
    },
    #[error("failed to close interface {interface}: {reason}")]
    Close { interface: String, reason: String },
    #[error("public key is not valid base64 or not 32 bytes: {0}")]
    InvalidPublicKey(String),
}

/// A peer as installed into the tunnel engine. Allowed-IPs discipline (§4.6):
/// exactly one `/32`, never a broader prefix — this mesh does not forward.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    pub public_key_b64: String,
    pub endpoint: SocketAddr,
    pub allowed_ip: Ipv4Addr,
}

pub trait TunnelEngine: Send + Sync {
    type Handle: Send + Sync;

    fn create(
        &self,
        interface_name: &str,
        private_key: [u8; 32],
        virtual_ip: Ipv4Addr,
        prefix_len: u8,
        listen_port: u16,
    ) -> Result<Self::Handle, TunnelError>;

    /// Idempotent: a repeated call with the same `public_key_b64` replaces
    /// the endpoint/allowed-ip rather than erroring or duplicating.
    fn add_peer(&self, handle: &Self::Handle, peer: &PeerConfig) -> Result<(), TunnelError>;

    fn update_endpoint(
        &self,
        handle: &Self::Handle,
        public_key_b64: &str,
        endpoint: SocketAddr,
    ) -> Result<(), TunnelError>;

    fn remove_peer(&self, handle: &Self::Handle, public_key_b64: &str) -> Result<(), TunnelError>;

    fn close(&self, handle: Self::Handle) -> Result<(), TunnelError>;
}

/// In-memory test double: no kernel calls, records every operation so tests
/// can assert on idempotency and replacement semantics (§8 invariant 7).
#[derive(Default)]
pub struct NullTunnelEngine;

pub struct NullHandle {
    pub interface_name: String,
    pub peers: parking_lot::Mutex<std::collections::HashMap<String, PeerConfig>>,
    pub closed: std::sync::atomic::AtomicBool,
}

impl TunnelEngine for NullTunnelEngine {
    type Handle = NullHandle;

    fn create(
        &self,
        interface_name: &str,
        _private_key: [u8; 32],
        _virtual_ip: Ipv4Addr,
        _prefix_len: u8,
        _listen_port: u16,
    ) -> Result<Self::Handle, TunnelError> {
        Ok(NullHandle {
            interface_name: interface_name.to_string(),
            peers: parking_lot::Mutex::new(std::collections::HashMap::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn add_peer(&self, handle: &Self::Handle, peer: &PeerConfig) -> Result<(), TunnelError> {
        handle
            .peers
            .lock()
            .insert(peer.public_key_b64.clone(), peer.clone());
        Ok(())
    }

    fn update_endpoint(
        &self,
        handle: &Self::Handle,
        public_key_b64: &str,
        endpoint: SocketAddr,
    ) -> Result<(), TunnelError> {
        let mut peers = handle.peers.lock();
        let peer = peers
            .get_mut(public_key_b64)
            .ok_or_else(|| TunnelError::PeerConfig {
                interface: handle.interface_name.clone(),
                public_key_b64: public_key_b64.to_string(),
                reason: "unknown peer".to_string(),
            })?;
        peer.endpoint = endpoint;
        Ok(())
    }

    fn remove_peer(&self, handle: &Self::Handle, public_key_b64: &str) -> Result<(), TunnelError> {
        handle.peers.lock().remove(public_key_b64);
        Ok(())
    }

    fn close(&self, handle: Self::Handle) -> Result<(), TunnelError> {
        handle.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(endpoint: &str) -> PeerConfig {
        PeerConfig {
            public_key_b64: "abc".to_string(),
            endpoint: endpoint.parse().unwrap(),
            allowed_ip: Ipv4Addr::new(10, 10, 0, 5),
        }
    }

    #[test]
    fn add_peer_is_idempotent_and_later_endpoint_wins() {
        let engine = NullTunnelEngine;
        let handle = engine
            .create("tun0", [0u8; 32], Ipv4Addr::new(10, 10, 0, 1), 24, 51820)
            .unwrap();

        engine.add_peer(&handle, &peer("1.2.3.4:51820")).unwrap();
        engine.add_peer(&handle, &peer("5.6.7.8:51820")).unwrap();

        let peers = handle.peers.lock();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["abc"].endpoint, "5.6.7.8:51820".parse().unwrap());
    }

    #[test]
    fn close_succeeds_and_releases_the_handle() {
        let engine = NullTunnelEngine;
        let handle = engine
            .create("tun0", [0u8; 32], Ipv4Addr::new(10, 10, 0, 1), 24, 51820)
            .unwrap();

        assert!(!handle.closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(engine.close(handle).is_ok());
    }
}
