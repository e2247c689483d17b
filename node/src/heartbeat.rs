//! Fixed-interval heartbeat emitter (§4.8). Unlike the teacher's exponential
//! backoff reconnect loop, a missed heartbeat here is not an error worth
//! backing off from — the directory's activity window tolerates a handful
//! of misses, so a failed send is logged and retried on the next tick.

use std::time::Duration;

use meshnet_directory_client::DirectoryClient;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run(client: DirectoryClient, id: String, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = client.heartbeat(&id).await {
                    warn!(error = %e, "heartbeat failed");
                }
            }
        }
    }
}
