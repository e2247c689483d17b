//! Shared `tracing` setup for the `directory` and `node` binaries.
//!
//! Trimmed from the teacher's logging crate: no Sentry layer, no telemetry
//! sampling macros, no rotating file appender — both binaries here are
//! daemons that log to stdout and are expected to run under a supervisor
//! (systemd, docker) that owns log collection, so we keep only what a plain
//! server process needs: an `EnvFilter`-driven stdout subscriber and a test
//! helper.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer, Registry};

mod err_with_sources;

pub use err_with_sources::{err_with_sources, ErrorWithSources};

/// Crates that are noisy at `debug`/`trace` but rarely what you're debugging.
///
/// Prepending this to the active filter means a catch-all directive like
/// `debug` stays useful instead of drowning in dependency chatter. Restate a
/// crate with its own directive (`rustls=debug`) to see it anyway.
const IRRELEVANT_CRATES: &str = "rustls=warn,reqwest=warn,h2=warn,hyper=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

/// Installs a global JSON-or-plain stdout subscriber driven by `RUST_LOG`
/// (falling back to `default_directives` when unset).
pub fn init(default_directives: &str, format: LogFormat) -> Result<()> {
    let filter = build_filter(default_directives).context("failed to parse log filter")?;
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Human => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .context("failed to install global tracing subscriber")?;

    Ok(())
}

fn build_filter(default_directives: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| default_directives.to_string());

    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Initialises a test-scoped subscriber; output goes through the test
/// harness's own writer so `cargo test -- --nocapture` still works.
pub fn test(directives: &str) -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
