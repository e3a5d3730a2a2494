use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use lockstep_model::{RoomId, SyncEvent};

use crate::error::Result;

/// One event delivered by the bus subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub room: RoomId,
    pub event: SyncEvent,
}

/// A live subscription over every room's event channel.
///
/// The stream ending (or erroring internally) means the transport dropped;
/// the consumer resubscribes with backoff and no state cleanup.
pub type BusStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// Cross-node event fan-out.
///
/// Publishing is best-effort: transient failures may be retried once, losses
/// are logged and never block the caller. Per-room events published by a
/// single node arrive in publish order; cross-node ordering is reconciled by
/// consumers via `last_updated` / `timestamp`, last writer wins.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, room: RoomId, event: &SyncEvent) -> Result<()>;

    /// Open a pattern subscription covering every room.
    async fn subscribe(&self) -> Result<BusStream>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
