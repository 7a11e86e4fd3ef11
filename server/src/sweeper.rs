//! # Expiry Sweeper
//!
//! Periodic task that deletes tunnels idle beyond a threshold, or already
//! disconnected. Runs until its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::TunnelRegistry;

pub async fn run(
    registry: Arc<TunnelRegistry>,
    sweep_interval: Duration,
    idle_threshold: Duration,
    cancel: CancellationToken,
) {
    let threshold = chrono::Duration::from_std(idle_threshold).unwrap_or(chrono::Duration::zero());
    let mut ticker = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let expired = registry.expired_ids(threshold);
                for tunnel_id in expired {
                    if registry.delete(&tunnel_id) {
                        info!(tunnel_id = %tunnel_id, "swept expired tunnel");
                    }
                }
            }
        }
    }
}
