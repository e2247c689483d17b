use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

impl From<LogFormat> for meshnet_logging::LogFormat {
    fn from(value: LogFormat) -> Self {
        match value {
            LogFormat::Human => meshnet_logging::LogFormat::Human,
            LogFormat::Json => meshnet_logging::LogFormat::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "meshnet-node", author, version, about)]
pub struct NodeArgs {
    /// Stable identity used to register with the directory and to derive the
    /// virtual IP. Auto-generated on first run if not given, then reused
    /// from `--id` on every subsequent run.
    #[arg(long, env)]
    pub id: Option<String>,

    /// Base URL of the directory service.
    #[arg(long, env, default_value = "http://127.0.0.1:8080")]
    pub control_plane_url: Url,

    /// Path to this node's persisted private key.
    #[arg(long, env, default_value = "node_key")]
    pub private_key_path: PathBuf,

    /// UDP port the tunnel listens on and the port STUN reports through.
    #[arg(long, env, default_value_t = 51820)]
    pub listen_port: u16,

    /// STUN server used for reflexive-address discovery.
    #[arg(long, env, default_value = "stun.l.google.com:19302")]
    pub stun_server: String,

    /// Skip STUN and use the first non-loopback local IPv4 instead. For
    /// environments where the node already has a routable address.
    #[arg(long, env, default_value_t = false)]
    pub stun_bypass: bool,

    /// Enables the legacy per-peer NAT-punching task (§4.7). Off by default
    /// because the tunnel engine's mandatory 25s persistent keepalive
    /// already satisfies NAT traversal for ordinary NATs.
    #[arg(long, env, default_value_t = false)]
    pub nat_keepalive: bool,

    #[arg(long, env, default_value = "500ms", value_parser = humantime::parse_duration)]
    pub nat_keepalive_interval: Duration,

    /// Name of the WireGuard interface to create.
    #[arg(long, env, default_value = "tun0")]
    pub interface_name: String,

    /// Overlay address for this node. Auto-derived from `--id` if absent.
    #[arg(long, env)]
    pub virtual_ip: Option<Ipv4Addr>,

    /// Prefix length of the overlay subnet.
    #[arg(long, env, default_value_t = 24)]
    pub virtual_prefix_len: u8,

    #[arg(long, env, default_value = "30s", value_parser = humantime::parse_duration)]
    pub heartbeat_interval: Duration,

    #[arg(long, env, value_enum, default_value_t = LogFormat::Human)]
    pub log_format: LogFormat,

    #[arg(long, env, default_value = "info")]
    pub log_directives: String,
}

impl NodeArgs {
    /// Resolves `--id`, generating and retaining a random one for the
    /// process lifetime when it wasn't given. Unlike the private key, this
    /// implementation does not persist a generated id to disk: callers who
    /// want a stable identity across restarts should pass `--id` explicitly.
    pub fn resolve_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }
}
