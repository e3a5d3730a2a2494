//! Redis bindings: key-value session state, distributed lock lease, and the
//! pub/sub event bus.

mod bus;
mod store;

pub use bus::RedisEventBus;
pub use store::RedisSyncStore;

use lockstep_model::{RoomId, UserId};

pub(crate) fn state_key(room: RoomId) -> String {
    format!("room:{room}:state")
}

pub(crate) fn participants_key(room: RoomId) -> String {
    format!("room:{room}:participants")
}

pub(crate) fn lock_key(room: RoomId) -> String {
    format!("room:{room}:lock")
}

pub(crate) fn presence_key(user: UserId) -> String {
    format!("presence:{user}")
}

pub(crate) fn events_channel(room: RoomId) -> String {
    format!("room:{room}:events")
}

/// Recover the room id from a `room:<id>:events` channel name.
pub(crate) fn room_from_channel(channel: &str) -> Option<RoomId> {
    channel
        .strip_prefix("room:")?
        .strip_suffix(":events")?
        .parse()
        .ok()
}
