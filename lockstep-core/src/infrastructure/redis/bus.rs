use async_trait::async_trait;
use futures_util::StreamExt;
use lockstep_model::{RoomId, SyncEvent};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use super::{events_channel, room_from_channel};
use crate::error::{Result, SyncError};
use crate::ports::{BusMessage, BusStream, EventBus};

fn bus_err(err: redis::RedisError) -> SyncError {
    SyncError::BusUnavailable(err.to_string())
}

/// Redis pub/sub binding of the [`EventBus`].
///
/// Command traffic (publish, ping) multiplexes over a `ConnectionManager`;
/// each subscription opens its own pub/sub connection, since a Redis
/// connection in subscriber mode cannot issue commands.
pub struct RedisEventBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventBus").finish_non_exhaustive()
    }
}

impl RedisEventBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(bus_err)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(bus_err)?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, room: RoomId, event: &SyncEvent) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|err| SyncError::BusUnavailable(format!("serialization: {err}")))?;
        let mut conn = self.conn.clone();
        // Receiver count is not meaningful here; a room may have no local
        // subscribers on any given node.
        let _: i64 = conn
            .publish(events_channel(room), payload)
            .await
            .map_err(bus_err)?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BusStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(bus_err)?;
        pubsub.psubscribe("room:*:events").await.map_err(bus_err)?;

        let stream = pubsub.into_on_message().filter_map(|message| async move {
            let channel = message.get_channel_name().to_string();
            let Some(room) = room_from_channel(&channel) else {
                warn!(channel, "event on unrecognized channel; dropping");
                return None;
            };
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(channel, error = %err, "unreadable event payload; dropping");
                    return None;
                }
            };
            match serde_json::from_str::<SyncEvent>(&payload) {
                Ok(event) => Some(BusMessage { room, event }),
                Err(err) => {
                    warn!(channel, error = %err, "undecodable event; dropping");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(bus_err)?;
        Ok(())
    }
}
