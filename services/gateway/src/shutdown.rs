use std::time::Duration;

use depth_relay::{DisconnectReason, DisconnectWaiter, FeedHandle};
use tracing::{info, warn};

/// Close the upstream session and wait for the read loop to finish.
///
/// Sends a normal close frame, then waits up to `timeout` for the disconnect
/// signal. If the peer never answers the read loop is aborted and `None` is
/// returned.
pub async fn shutdown(
    feed: &FeedHandle,
    disconnected: DisconnectWaiter,
    timeout: Duration,
) -> Option<DisconnectReason> {
    if let Err(e) = feed.close().await {
        warn!(error = %e, "Failed to close depth stream cleanly");
    }

    match tokio::time::timeout(timeout, disconnected).await {
        Ok(reason) => {
            info!(%reason, "Depth stream closed");
            Some(reason)
        }
        Err(_) => {
            warn!(?timeout, "Close handshake timed out");
            feed.abort();
            None
        }
    }
}
