//! Drives a single node through INIT → KEYED → REFLECTED → TUNNEL_READY →
//! REGISTERED → MESHED → RUNNING (§4.9). Bootstrapping is linear and
//! one-shot; once `RUNNING` is reached, `reconcile_peers` is called
//! repeatedly by the mesh-refresh loop in `main`.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use meshnet_directory_client::DirectoryClient;
use meshnet_keys::NodeKeyPair;
use meshnet_protocol::{virtual_ip, PeerInfo, RegisterRequest};
use meshnet_tunnel::{PeerConfig, TunnelEngine};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::NodeArgs;
use crate::keepalive;

/// Per-peer NAT-keepalive knobs, only present when `--nat-keepalive` is set.
struct KeepaliveConfig {
    socket: Arc<UdpSocket>,
    interval: Duration,
}

struct InstalledPeer {
    config: PeerConfig,
    keepalive: Option<(CancellationToken, JoinHandle<()>)>,
}

pub struct Supervisor<E: TunnelEngine> {
    id: String,
    virtual_ip: Ipv4Addr,
    prefix_len: u8,
    client: DirectoryClient,
    engine: E,
    handle: E::Handle,
    keepalive: Option<KeepaliveConfig>,
    installed: parking_lot::Mutex<HashMap<String, InstalledPeer>>,
}

impl<E: TunnelEngine> Supervisor<E> {
    /// Carries a freshly-bootstrapped node from INIT through REGISTERED.
    ///
    /// `socket` is bound once by the caller (with `SO_REUSEADDR` and
    /// `SO_REUSEPORT`, see `main::bind_socket`) and shared: used here for
    /// STUN discovery, then (if NAT keepalive is enabled) reused for the
    /// per-peer probe tasks via the `Arc`. The tunnel engine binds its own
    /// kernel socket on the same `listen_port` rather than taking this one,
    /// since the kernel WireGuard device owns its socket independently —
    /// sharing the port (not the fd) is what makes the STUN-discovered
    /// mapping apply.
    pub async fn bootstrap(
        args: &NodeArgs,
        engine: E,
        socket: &Arc<UdpSocket>,
    ) -> anyhow::Result<Self> {
        let id = args.resolve_id();

        // KEYED
        let keys = NodeKeyPair::load_or_generate(&args.private_key_path)?;
        info!(public_key = %keys.public_key_base64(), "key pair ready");

        // REFLECTED
        let (reflexive_ip, reflexive_port) = if args.stun_bypass {
            meshnet_stun_client::bypass(args.listen_port)?
        } else {
            meshnet_stun_client::discover(socket, &args.stun_server).await?
        };
        info!(%reflexive_ip, reflexive_port, "reflexive address discovered");

        // TUNNEL_READY
        let virtual_ip = args.virtual_ip.unwrap_or_else(|| virtual_ip(&id));
        let handle = engine.create(
            &args.interface_name,
            keys.private_key_bytes(),
            virtual_ip,
            args.virtual_prefix_len,
            args.listen_port,
        )?;
        info!(%virtual_ip, interface = %args.interface_name, "tunnel interface up");

        // REGISTERED
        let client = DirectoryClient::new(args.control_plane_url.clone())?;
        client
            .register(&RegisterRequest {
                id: id.clone(),
                wg_public_key: keys.public_key_base64(),
                endpoint_ip: reflexive_ip,
                endpoint_port: reflexive_port,
            })
            .await?;
        info!(%id, "registered with directory");

        let keepalive = if args.nat_keepalive {
            Some(KeepaliveConfig {
                socket: socket.clone(),
                interval: args.nat_keepalive_interval,
            })
        } else {
            None
        };

        Ok(Self {
            id,
            virtual_ip,
            prefix_len: args.virtual_prefix_len,
            client,
            engine,
            handle,
            keepalive,
            installed: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.virtual_ip
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn client(&self) -> &DirectoryClient {
        &self.client
    }

    /// Pulls the active peer set from the directory and brings the tunnel
    /// engine's configured peers in line with it. A single bad peer (an
    /// unparsable key, an unreachable endpoint) is logged and skipped — it
    /// must not stop the rest of the mesh from converging (§4.9).
    pub async fn reconcile_peers(&self) -> anyhow::Result<()> {
        let peers = self.client.list_peers(&self.id).await?;
        self.apply_peers(&peers);
        Ok(())
    }

    /// The synchronous half of reconciliation, split out from
    /// `reconcile_peers` so it can be exercised directly in tests without a
    /// directory to talk to.
    fn apply_peers(&self, peers: &[PeerInfo]) {
        let mut wanted = HashSet::with_capacity(peers.len());

        for peer in peers {
            wanted.insert(peer.wg_public_key.clone());
            if let Err(e) = self.apply_peer(peer) {
                warn!(peer = %peer.id, error = %e, "skipping peer during reconciliation");
            }
        }

        self.prune_stale_peers(&wanted);
    }

    fn apply_peer(&self, peer: &PeerInfo) -> Result<(), meshnet_tunnel::TunnelError> {
        let config = PeerConfig {
            public_key_b64: peer.wg_public_key.clone(),
            endpoint: SocketAddr::new(peer.endpoint_ip.into(), peer.endpoint_port),
            allowed_ip: virtual_ip(&peer.id),
        };

        self.engine.add_peer(&self.handle, &config)?;

        let mut installed = self.installed.lock();
        match installed.get_mut(&config.public_key_b64) {
            Some(existing) if existing.config.endpoint == config.endpoint => {}
            Some(existing) => {
                existing.config = config;
            }
            None => {
                let keepalive = self.spawn_keepalive(&config);
                installed.insert(config.public_key_b64.clone(), InstalledPeer { config, keepalive });
            }
        }
        Ok(())
    }

    fn spawn_keepalive(&self, config: &PeerConfig) -> Option<(CancellationToken, JoinHandle<()>)> {
        let keepalive = self.keepalive.as_ref()?;
        let cancel = CancellationToken::new();
        let handle = tokio::task::spawn(keepalive::run_for_peer(
            keepalive.socket.clone(),
            config.endpoint,
            keepalive.interval,
            cancel.clone(),
        ));
        Some((cancel, handle))
    }

    fn prune_stale_peers(&self, wanted: &HashSet<String>) {
        let mut installed = self.installed.lock();
        let stale: Vec<String> = installed
            .keys()
            .filter(|key| !wanted.contains(*key))
            .cloned()
            .collect();

        for key in stale {
            if let Err(e) = self.engine.remove_peer(&self.handle, &key) {
                warn!(peer_key = %key, error = %e, "failed to remove stale peer");
                continue;
            }
            if let Some(peer) = installed.remove(&key) {
                if let Some((cancel, _handle)) = peer.keepalive {
                    cancel.cancel();
                }
            }
        }
    }

    /// Cancels and joins every outstanding keepalive task, then closes the
    /// tunnel. Each join is bounded so a wedged task cannot hang shutdown.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        const KEEPALIVE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

        for (_, peer) in self.installed.into_inner() {
            if let Some((cancel, handle)) = peer.keepalive {
                cancel.cancel();
                if tokio::time::timeout(KEEPALIVE_JOIN_TIMEOUT, handle).await.is_err() {
                    warn!("keepalive task did not exit within the shutdown grace period");
                }
            }
        }
        self.engine.close(self.handle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use meshnet_tunnel::{NullHandle, NullTunnelEngine, TunnelError};
    use url::Url;

    use super::*;

    /// Wraps `NullTunnelEngine` but fails `add_peer` for one designated key,
    /// so per-peer failure isolation can be exercised without a real
    /// WireGuard device.
    struct FailingTunnelEngine {
        inner: NullTunnelEngine,
        fails_for: String,
    }

    impl TunnelEngine for FailingTunnelEngine {
        type Handle = NullHandle;

        fn create(
            &self,
            interface_name: &str,
            private_key: [u8; 32],
            virtual_ip: Ipv4Addr,
            prefix_len: u8,
            listen_port: u16,
        ) -> Result<Self::Handle, TunnelError> {
            self.inner.create(interface_name, private_key, virtual_ip, prefix_len, listen_port)
        }

        fn add_peer(&self, handle: &Self::Handle, peer: &PeerConfig) -> Result<(), TunnelError> {
            if peer.public_key_b64 == self.fails_for {
                return Err(TunnelError::PeerConfig {
                    interface: handle.interface_name.clone(),
                    public_key_b64: peer.public_key_b64.clone(),
                    reason: "simulated failure".to_string(),
                });
            }
            self.inner.add_peer(handle, peer)
        }

        fn update_endpoint(
            &self,
            handle: &Self::Handle,
            public_key_b64: &str,
            endpoint: SocketAddr,
        ) -> Result<(), TunnelError> {
            self.inner.update_endpoint(handle, public_key_b64, endpoint)
        }

        fn remove_peer(&self, handle: &Self::Handle, public_key_b64: &str) -> Result<(), TunnelError> {
            self.inner.remove_peer(handle, public_key_b64)
        }

        fn close(&self, handle: Self::Handle) -> Result<(), TunnelError> {
            self.inner.close(handle)
        }
    }

    fn test_peer(id: &str, key: &str) -> PeerInfo {
        PeerInfo {
            id: id.to_string(),
            wg_public_key: key.to_string(),
            endpoint_ip: Ipv4Addr::new(127, 0, 0, 1),
            endpoint_port: 51820,
            last_seen: None,
        }
    }

    /// Builds a `Supervisor` directly, skipping `bootstrap`'s key
    /// provisioning, STUN discovery, and directory registration — none of
    /// which `apply_peers`/`prune_stale_peers` touch. `client` is never
    /// called in these tests, so its base URL is never dialed.
    fn supervisor_with<E: TunnelEngine>(engine: E, handle: E::Handle) -> Supervisor<E> {
        Supervisor {
            id: "self".to_string(),
            virtual_ip: Ipv4Addr::new(10, 10, 0, 1),
            prefix_len: 24,
            client: DirectoryClient::new(Url::parse("http://127.0.0.1:0").unwrap()).unwrap(),
            engine,
            handle,
            keepalive: None,
            installed: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn apply_peers_skips_a_failing_peer_without_blocking_others() {
        let inner = NullTunnelEngine;
        let handle = inner
            .create("tun0", [0u8; 32], Ipv4Addr::new(10, 10, 0, 1), 24, 51820)
            .unwrap();
        let engine = FailingTunnelEngine { inner, fails_for: "bad-key".to_string() };
        let sup = supervisor_with(engine, handle);

        sup.apply_peers(&[test_peer("bad", "bad-key"), test_peer("good", "good-key")]);

        let installed = sup.installed.lock();
        assert_eq!(installed.len(), 1);
        assert!(installed.contains_key("good-key"));
        assert!(!installed.contains_key("bad-key"));
    }

    #[test]
    fn apply_peers_prunes_peers_no_longer_wanted() {
        let inner = NullTunnelEngine;
        let handle = inner
            .create("tun0", [0u8; 32], Ipv4Addr::new(10, 10, 0, 1), 24, 51820)
            .unwrap();
        let sup = supervisor_with(inner, handle);

        sup.apply_peers(&[test_peer("a", "key-a"), test_peer("b", "key-b")]);
        assert_eq!(sup.installed.lock().len(), 2);

        sup.apply_peers(&[test_peer("a", "key-a")]);

        let installed = sup.installed.lock();
        assert_eq!(installed.len(), 1);
        assert!(installed.contains_key("key-a"));
        drop(installed);
        assert!(!sup.handle.peers.lock().contains_key("key-b"));
    }
}
