//! Control-plane binary: owns the peer table and serves the HTTP/JSON API
//! that nodes register against and poll for peer listings.

mod http;
mod service;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use meshnet_bin_shared::signals::Terminate;
use meshnet_storage::Storage;
use service::DirectoryService;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
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
#[command(name = "meshnet-directory", author, version, about)]
struct DirectoryArgs {
    /// Address to listen for HTTP requests on.
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Path to the SQLite database file. `:memory:` keeps no state on disk.
    #[arg(long, env, default_value = "directory.sqlite3")]
    db_path: String,

    /// How long a peer is considered active after its last heartbeat.
    #[arg(long, env, default_value = "5min", value_parser = humantime::parse_duration)]
    activity_window: Duration,

    /// Bearer token required on `/register` and `/heartbeat`. Unset disables auth.
    #[arg(long, env)]
    api_key: Option<String>,

    #[arg(long, env, value_enum, default_value_t = LogFormat::Human)]
    log_format: LogFormat,

    /// `RUST_LOG`-style filter directives.
    #[arg(long, env, default_value = "info")]
    log_directives: String,
}

fn main() -> ExitCode {
    let args = DirectoryArgs::parse();

    if let Err(e) = meshnet_logging::init(&args.log_directives, args.log_format.into()) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(try_main(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(args: DirectoryArgs) -> anyhow::Result<()> {
    let storage = if args.db_path == ":memory:" {
        Storage::open_in_memory().context("failed to open in-memory database")?
    } else {
        Storage::open(std::path::Path::new(&args.db_path))
            .with_context(|| format!("failed to open database at {}", args.db_path))?
    };

    let service = DirectoryService::new(storage, args.activity_window);
    let app = http::router(service, args.api_key);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;

    tracing::info!(addr = %args.listen_addr, "directory listening");

    let mut terminate = Terminate::new().context("failed to install signal handlers")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            terminate.recv().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
