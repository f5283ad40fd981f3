use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ws::hub::Hub;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn a task that queues a Ping frame to every connected client each
/// interval until `cancel` fires. Clients whose queue is full are evicted.
pub fn start_heartbeat(hub: Arc<Hub>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let count = hub.ping_all().await;
                    tracing::debug!(count, "WebSocket heartbeat ping");
                }
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}
