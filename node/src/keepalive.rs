//! Optional legacy NAT keepalive (§4.7, §9 Decision): one task per peer,
//! each sending a one-byte UDP datagram to that peer's endpoint at a
//! configured interval. Off by default — the tunnel engine's own
//! persistent keepalive is normally sufficient, so this only exists for
//! NATs stricter than the common case and wanting faster first contact.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const PROBE: &[u8] = b"\0";

/// Runs until cancelled. Meant to be spawned once per peer and cancelled
/// when that peer leaves the mesh — the supervisor tracks one
/// `CancellationToken` per installed peer for exactly this.
pub async fn run_for_peer(
    socket: Arc<UdpSocket>,
    endpoint: SocketAddr,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(PROBE, endpoint).await {
                    warn!(%endpoint, error = %e, "NAT keepalive probe failed");
                }
            }
        }
    }
}
