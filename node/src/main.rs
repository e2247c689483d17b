//! Per-host overlay agent: key provisioning, reflexive-address discovery,
//! registration, peer-set reconciliation, and heartbeating (§4).
//!
//! Runs on a current-thread runtime — one supervisor plus a handful of
//! lightweight background tasks, the same shape as the teacher's gateway
//! process rather than its multi-threaded relay.

mod config;
mod heartbeat;
mod keepalive;
mod supervisor;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use meshnet_bin_shared::signals::Terminate;
use meshnet_tunnel::WireguardControlEngine;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config::NodeArgs;
use supervisor::Supervisor;

/// How often the mesh-refresh loop re-pulls the peer list and reconciles
/// the tunnel engine against it.
const MESH_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Grace period for background tasks to notice cancellation on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    let args = NodeArgs::parse();

    if let Err(e) = meshnet_logging::init(&args.log_directives, args.log_format.into()) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start async runtime: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(try_main(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(args: NodeArgs) -> anyhow::Result<()> {
    let socket = bind_socket(args.listen_addr())?;
    let socket = Arc::new(UdpSocket::from_std(socket)?);

    let supervisor = Supervisor::bootstrap(&args, WireguardControlEngine::new(), &socket).await?;
    let supervisor = Arc::new(supervisor);
    info!(id = %supervisor.id(), virtual_ip = %supervisor.virtual_ip(), "node running");

    supervisor.reconcile_peers().await?;

    let cancel = CancellationToken::new();

    let heartbeat_task = tokio::task::spawn(heartbeat::run(
        supervisor.client().clone(),
        supervisor.id().to_string(),
        args.heartbeat_interval,
        cancel.clone(),
    ));

    let mesh_task = tokio::task::spawn(mesh_refresh_loop(supervisor.clone(), cancel.clone()));

    let mut terminate = Terminate::new()?;
    terminate.recv().await;
    info!("shutdown signal received");

    cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = heartbeat_task.await;
        let _ = mesh_task.await;
    })
    .await;

    match Arc::try_unwrap(supervisor) {
        Ok(supervisor) => supervisor.shutdown().await?,
        Err(_) => error!("supervisor still referenced at shutdown, tunnel left configured"),
    }

    Ok(())
}

async fn mesh_refresh_loop<E>(supervisor: Arc<Supervisor<E>>, cancel: CancellationToken)
where
    E: meshnet_tunnel::TunnelEngine,
{
    let mut ticker = tokio::time::interval(MESH_REFRESH_INTERVAL);
    ticker.tick().await; // the initial reconcile already happened in try_main

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = supervisor.reconcile_peers().await {
                    tracing::warn!(error = %e, "mesh reconciliation failed, will retry");
                }
            }
        }
    }
}

/// Binds with `SO_REUSEADDR` and `SO_REUSEPORT` so the kernel WireGuard
/// device's own socket can bind the same `listen_port` afterwards (§4.9):
/// the two sockets share the port, never the fd.
fn bind_socket(addr: std::net::SocketAddr) -> anyhow::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
