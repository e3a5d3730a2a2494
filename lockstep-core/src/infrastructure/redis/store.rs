use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lockstep_model::{Participant, PlaybackState, RoomId, UserId};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{lock_key, participants_key, presence_key, state_key};
use crate::error::{Result, SyncError};
use crate::ports::SyncStore;

/// Atomic lock release: delete the lease only while we still hold it, so a
/// release arriving after expiry cannot kill another holder's lease.
fn release_script() -> redis::Script {
    redis::Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    )
}

/// Presence record stored per user.
#[derive(Debug, Serialize, Deserialize)]
struct PresenceRecord {
    room_id: RoomId,
    tag: String,
}

/// Redis-backed [`SyncStore`].
///
/// Key layout per room: `room:<id>:state` (JSON playback state),
/// `room:<id>:participants` (hash, user id -> JSON participant),
/// `room:<id>:lock` (lease holder). Presence lives under
/// `presence:<user_id>` with a TTL. A room whose participant hash empties is
/// given a grace-period TTL on its state key instead of immediate deletion.
pub struct RedisSyncStore {
    conn: ConnectionManager,
    presence_ttl: Duration,
    room_grace: Duration,
    release: redis::Script,
}

impl std::fmt::Debug for RedisSyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSyncStore")
            .field("presence_ttl", &self.presence_ttl)
            .field("room_grace", &self.room_grace)
            .finish_non_exhaustive()
    }
}

fn store_err(err: redis::RedisError) -> SyncError {
    SyncError::StoreUnavailable(err.to_string())
}

fn encode_err(err: serde_json::Error) -> SyncError {
    SyncError::StoreUnavailable(format!("serialization: {err}"))
}

impl RedisSyncStore {
    pub async fn connect(
        url: &str,
        presence_ttl: Duration,
        room_grace: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(Self {
            conn,
            presence_ttl,
            room_grace,
            release: release_script(),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Arm or clear room GC depending on whether anyone is left.
    async fn update_room_expiry(&self, room: RoomId) -> Result<()> {
        let mut conn = self.connection();
        let members: i64 = conn
            .hlen(participants_key(room))
            .await
            .map_err(store_err)?;
        if members > 0 {
            let _: bool = conn.persist(state_key(room)).await.map_err(store_err)?;
        } else {
            let _: bool = conn
                .expire(state_key(room), self.room_grace.as_secs() as i64)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SyncStore for RedisSyncStore {
    async fn get_state(&self, room: RoomId) -> Result<PlaybackState> {
        let mut conn = self.connection();
        let raw: Option<String> = conn.get(state_key(room)).await.map_err(store_err)?;

        if let Some(raw) = raw {
            match serde_json::from_str(&raw) {
                Ok(state) => return Ok(state),
                Err(err) => {
                    warn!(room_id = %room, error = %err, "corrupt stored state; resetting to default");
                }
            }
        }

        // Materialize and persist the default. NX leaves a concurrently
        // written value alone; the grace TTL stops read-only traffic from
        // creating immortal rooms.
        let state = PlaybackState::default();
        let payload = serde_json::to_string(&state).map_err(encode_err)?;
        let _: Option<String> = redis::cmd("SET")
            .arg(state_key(room))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(self.room_grace.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        self.update_room_expiry(room).await?;
        Ok(state)
    }

    async fn set_state(&self, room: RoomId, state: &PlaybackState) -> Result<()> {
        let payload = serde_json::to_string(state).map_err(encode_err)?;
        let mut conn = self.connection();
        // Plain SET clears any pending grace TTL; a mutating room is live.
        let _: () = conn
            .set(state_key(room), payload)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn add_participant(&self, room: RoomId, participant: &Participant) -> Result<()> {
        let payload = serde_json::to_string(participant).map_err(encode_err)?;
        let mut conn = self.connection();
        let _: () = conn
            .hset(
                participants_key(room),
                participant.user_id.to_string(),
                payload,
            )
            .await
            .map_err(store_err)?;
        self.update_room_expiry(room).await
    }

    async fn remove_participant(&self, room: RoomId, user: UserId) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn
            .hdel(participants_key(room), user.to_string())
            .await
            .map_err(store_err)?;
        self.update_room_expiry(room).await
    }

    async fn update_presence(&self, room: RoomId, user: UserId) -> Result<()> {
        let mut conn = self.connection();

        let raw: Option<String> = conn
            .hget(participants_key(room), user.to_string())
            .await
            .map_err(store_err)?;
        if let Some(raw) = raw
            && let Ok(mut participant) = serde_json::from_str::<Participant>(&raw)
        {
            participant.touch(Utc::now());
            let payload = serde_json::to_string(&participant).map_err(encode_err)?;
            let _: () = conn
                .hset(participants_key(room), user.to_string(), payload)
                .await
                .map_err(store_err)?;
        }

        let _: bool = conn
            .expire(presence_key(user), self.presence_ttl.as_secs() as i64)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn set_buffering(&self, room: RoomId, user: UserId, buffering: bool) -> Result<()> {
        let mut conn = self.connection();
        let raw: Option<String> = conn
            .hget(participants_key(room), user.to_string())
            .await
            .map_err(store_err)?;
        let Some(raw) = raw else {
            debug!(room_id = %room, user_id = %user, "buffering update for unknown participant");
            return Ok(());
        };
        let mut participant: Participant = serde_json::from_str(&raw)
            .map_err(|err| SyncError::StoreUnavailable(format!("corrupt participant: {err}")))?;
        participant.is_buffering = buffering;
        let payload = serde_json::to_string(&participant).map_err(encode_err)?;
        let _: () = conn
            .hset(participants_key(room), user.to_string(), payload)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_participants(&self, room: RoomId) -> Result<Vec<Participant>> {
        let mut conn = self.connection();
        let raw: Vec<String> = conn
            .hvals(participants_key(room))
            .await
            .map_err(store_err)?;

        let mut participants = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_str::<Participant>(&value) {
                Ok(participant) => participants.push(participant),
                Err(err) => {
                    warn!(room_id = %room, error = %err, "skipping corrupt participant record");
                }
            }
        }
        Ok(participants)
    }

    async fn set_presence(&self, user: UserId, room: RoomId, tag: &str) -> Result<()> {
        let record = PresenceRecord {
            room_id: room,
            tag: tag.to_string(),
        };
        let payload = serde_json::to_string(&record).map_err(encode_err)?;
        let mut conn = self.connection();
        let _: () = conn
            .set_ex(presence_key(user), payload, self.presence_ttl.as_secs())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn remove_presence(&self, user: UserId) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.del(presence_key(user)).await.map_err(store_err)?;
        Ok(())
    }

    async fn acquire_room_lock(
        &self,
        room: RoomId,
        holder: UserId,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.connection();
        let granted: Option<String> = redis::cmd("SET")
            .arg(lock_key(room))
            .arg(holder.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(granted.is_some())
    }

    async fn release_room_lock(&self, room: RoomId, holder: UserId) -> Result<()> {
        let mut conn = self.connection();
        let _: i64 = self
            .release
            .key(lock_key(room))
            .arg(holder.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn cleanup_expired(&self, rooms: &[RoomId]) -> Result<u32> {
        let mut conn = self.connection();
        let now = Utc::now();
        let ttl_secs = self.presence_ttl.as_secs();
        let mut evicted = 0u32;

        for &room in rooms {
            let records: std::collections::HashMap<String, String> = conn
                .hgetall(participants_key(room))
                .await
                .map_err(store_err)?;

            let mut room_evicted = 0u32;
            for (field, value) in records {
                let stale = match serde_json::from_str::<Participant>(&value) {
                    Ok(participant) => participant.is_stale(now, ttl_secs),
                    // Unparseable records are unrecoverable; sweep them too.
                    Err(_) => true,
                };
                if stale {
                    let _: () = conn
                        .hdel(participants_key(room), &field)
                        .await
                        .map_err(store_err)?;
                    room_evicted += 1;
                }
            }

            if room_evicted > 0 {
                self.update_room_expiry(room).await?;
                evicted += room_evicted;
            }
        }

        Ok(evicted)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
