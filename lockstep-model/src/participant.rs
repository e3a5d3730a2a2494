use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A connected viewer in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub is_buffering: bool,
}

impl Participant {
    pub fn new(user_id: UserId, username: impl Into<String>, is_host: bool) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            username: username.into(),
            is_host,
            joined_at: now,
            last_seen: now,
            is_buffering: false,
        }
    }

    /// Display name for a guest, carrying the visible suffix.
    pub fn guest_username(name: &str) -> String {
        format!("{name} (Guest)")
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
    }

    /// Whether the participant has not been seen within `ttl_secs`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        (now - self.last_seen).num_seconds() >= ttl_secs as i64
    }
}
