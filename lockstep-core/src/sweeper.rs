//! Presence sweeper.
//!
//! Periodically evicts participants whose presence TTL lapsed and drops
//! stale pending handoffs. Purely janitorial; it never emits wire events.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::SyncEngine;

/// Run the sweep loop until `shutdown` fires.
pub async fn run_sweeper(engine: Arc<SyncEngine>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => engine.sweep().await,
        }
    }
}
