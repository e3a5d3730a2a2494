use std::time::Duration;

use async_trait::async_trait;
use lockstep_model::{Participant, PlaybackState, RoomId, UserId};

use crate::error::Result;

/// Authoritative per-room session state, shared by every sync node.
///
/// Read paths degrade to defaults where one exists: `get_state` materializes
/// and persists the default state on miss, `list_participants` returns an
/// empty list when the room is unknown. Write failures surface as
/// `StoreUnavailable`; callers may retry once and must keep serving other
/// rooms.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Fetch the room's playback state, materializing the default on miss.
    async fn get_state(&self, room: RoomId) -> Result<PlaybackState>;

    /// Overwrite the room's playback state.
    async fn set_state(&self, room: RoomId, state: &PlaybackState) -> Result<()>;

    /// Register (or replace) a participant record.
    async fn add_participant(&self, room: RoomId, participant: &Participant) -> Result<()>;

    async fn remove_participant(&self, room: RoomId, user: UserId) -> Result<()>;

    /// Refresh `last_seen` on the participant record and re-arm the user's
    /// presence key.
    async fn update_presence(&self, room: RoomId, user: UserId) -> Result<()>;

    /// Flip the buffering display flag on a participant record.
    async fn set_buffering(&self, room: RoomId, user: UserId, buffering: bool) -> Result<()>;

    async fn list_participants(&self, room: RoomId) -> Result<Vec<Participant>>;

    /// Record which room the user is active in, with a TTL.
    async fn set_presence(&self, user: UserId, room: RoomId, tag: &str) -> Result<()>;

    async fn remove_presence(&self, user: UserId) -> Result<()>;

    /// Try to take the distributed room lease. Returns `true` iff this holder
    /// now owns the lock. Atomic across nodes.
    async fn acquire_room_lock(&self, room: RoomId, holder: UserId, ttl: Duration)
    -> Result<bool>;

    /// Drop the lease if this holder still owns it. Idempotent; safe after
    /// expiry.
    async fn release_room_lock(&self, room: RoomId, holder: UserId) -> Result<()>;

    /// Evict participants not seen within the presence TTL. Expired presence
    /// keys clean themselves up. Returns the number of evicted records.
    async fn cleanup_expired(&self, rooms: &[RoomId]) -> Result<u32>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
