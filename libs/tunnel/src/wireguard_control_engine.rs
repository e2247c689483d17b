use std::net::Ipv4Addr;
use std::process::Command;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use wireguard_control::{Backend, DeviceUpdate, InterfaceName, Key, PeerConfigBuilder};

use crate::{PERSISTENT_KEEPALIVE, PeerConfig, TunnelEngine, TunnelError};

/// Drives the host's kernel WireGuard module via `wireguard-control`, the
/// same crate `innernet-server` uses. Interface creation and address
/// assignment go through `ip link`/`ip address` (as `wg-quick` itself does;
/// `wireguard-control` only speaks the WireGuard netlink family, not general
/// interface management).
#[derive(Default)]
pub struct WireguardControlEngine {
    backend: Backend,
}

pub struct Handle {
    interface: InterfaceName,
}

impl WireguardControlEngine {
    pub fn new() -> Self {
        Self {
            backend: Backend::default(),
        }
    }
}

impl TunnelEngine for WireguardControlEngine {
    type Handle = Handle;

    fn create(
        &self,
        interface_name: &str,
        private_key: [u8; 32],
        virtual_ip: Ipv4Addr,
        prefix_len: u8,
        listen_port: u16,
    ) -> Result<Self::Handle, TunnelError> {
        let interface: InterfaceName =
            interface_name
                .parse()
                .map_err(|e: wireguard_control::InvalidInterfaceName| TunnelError::InterfaceUp {
                    interface: interface_name.to_string(),
                    reason: e.to_string(),
                })?;

        ensure_link_exists(interface_name)?;
        assign_address(interface_name, virtual_ip, prefix_len)?;
        bring_link_up(interface_name)?;

        let private_key = Key::from_bytes(private_key);

        DeviceUpdate::new()
            .set_private_key(private_key)
            .set_listen_port(listen_port)
            .apply(&interface, self.backend)
            .map_err(|e| TunnelError::InterfaceUp {
                interface: interface_name.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(interface = %interface_name, %virtual_ip, prefix_len, listen_port, "tunnel interface up");

        Ok(Handle { interface })
    }

    fn add_peer(&self, handle: &Self::Handle, peer: &PeerConfig) -> Result<(), TunnelError> {
        let public_key = decode_key(&peer.public_key_b64)?;

        let builder = PeerConfigBuilder::new(&public_key)
            .set_endpoint(peer.endpoint)
            .add_allowed_ip(peer.allowed_ip.into(), 32)
            .set_persistent_keepalive_interval(PERSISTENT_KEEPALIVE);

        // `DeviceUpdate::add_peer` replaces any existing peer with the same
        // public key, giving us the idempotent-replace semantics §4.6 asks for.
        DeviceUpdate::new()
            .add_peer(builder)
            .apply(&handle.interface, self.backend)
            .map_err(|e| TunnelError::PeerConfig {
                interface: handle.interface.to_string(),
                public_key_b64: peer.public_key_b64.clone(),
                reason: e.to_string(),
            })
    }

    fn update_endpoint(
        &self,
        handle: &Self::Handle,
        public_key_b64: &str,
        endpoint: std::net::SocketAddr,
    ) -> Result<(), TunnelError> {
        let public_key = decode_key(public_key_b64)?;
        let builder = PeerConfigBuilder::new(&public_key).set_endpoint(endpoint);

        DeviceUpdate::new()
            .add_peer(builder)
            .apply(&handle.interface, self.backend)
            .map_err(|e| TunnelError::PeerConfig {
                interface: handle.interface.to_string(),
                public_key_b64: public_key_b64.to_string(),
                reason: e.to_string(),
            })
    }

    fn remove_peer(&self, handle: &Self::Handle, public_key_b64: &str) -> Result<(), TunnelError> {
        let public_key = decode_key(public_key_b64)?;

        DeviceUpdate::new()
            .remove_peer_by_key(&public_key)
            .apply(&handle.interface, self.backend)
            .map_err(|e| TunnelError::PeerConfig {
                interface: handle.interface.to_string(),
                public_key_b64: public_key_b64.to_string(),
                reason: e.to_string(),
            })
    }

    fn close(&self, handle: Self::Handle) -> Result<(), TunnelError> {
        let status = Command::new("ip")
            .args(["link", "delete", "dev", &handle.interface.to_string()])
            .status()
            .map_err(|e| TunnelError::Close {
                interface: handle.interface.to_string(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(TunnelError::Close {
                interface: handle.interface.to_string(),
                reason: format!("`ip link delete` exited with {status}"),
            });
        }

        Ok(())
    }
}

fn decode_key(encoded: &str) -> Result<Key, TunnelError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| TunnelError::InvalidPublicKey(e.to_string()))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TunnelError::InvalidPublicKey(encoded.to_string()))?;
    Ok(Key::from_bytes(array))
}

/// `wireguard-control` configures an *existing* WireGuard device; creating
/// the device itself is a general network-interface operation outside its
/// scope, so we shell out to `ip link add`, exactly as `wg-quick` does.
/// Idempotent: "File exists" from a previous run is not an error.
fn ensure_link_exists(interface_name: &str) -> Result<(), TunnelError> {
    let output = Command::new("ip")
        .args(["link", "add", interface_name, "type", "wireguard"])
        .output()
        .map_err(|e| TunnelError::InterfaceUp {
            interface: interface_name.to_string(),
            reason: e.to_string(),
        })?;

    if output.status.success() || stderr_means_exists(&output.stderr) {
        return Ok(());
    }

    Err(TunnelError::InterfaceUp {
        interface: interface_name.to_string(),
        reason: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn assign_address(interface_name: &str, virtual_ip: Ipv4Addr, prefix_len: u8) -> Result<(), TunnelError> {
    let cidr = format!("{virtual_ip}/{prefix_len}");
    let output = Command::new("ip")
        .args(["address", "add", &cidr, "dev", interface_name])
        .output()
        .map_err(|e| TunnelError::InterfaceUp {
            interface: interface_name.to_string(),
            reason: e.to_string(),
        })?;

    if output.status.success() || stderr_means_exists(&output.stderr) {
        return Ok(());
    }

    Err(TunnelError::InterfaceUp {
        interface: interface_name.to_string(),
        reason: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn bring_link_up(interface_name: &str) -> Result<(), TunnelError> {
    let status = Command::new("ip")
        .args(["link", "set", "up", "dev", interface_name])
        .status()
        .map_err(|e| TunnelError::InterfaceUp {
            interface: interface_name.to_string(),
            reason: e.to_string(),
        })?;

    if status.success() {
        return Ok(());
    }

    Err(TunnelError::InterfaceUp {
        interface: interface_name.to_string(),
        reason: format!("`ip link set up` exited with {status}"),
    })
}

fn stderr_means_exists(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains("File exists")
}
