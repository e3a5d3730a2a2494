//! Pending live-state handoffs.
//!
//! Process-local table of joiners waiting for a `provide_state` answer from a
//! peer on this node. Entries are removed by the answer, by the per-entry
//! fallback timer, by the requester leaving, or (backstop) by the sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lockstep_model::{RoomId, UserId};
use tokio::sync::RwLock;

use crate::registry::ConnectionHandle;

pub(crate) struct PendingHandoff {
    pub requester: Arc<ConnectionHandle>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct HandoffTable {
    entries: RwLock<HashMap<(RoomId, UserId), PendingHandoff>>,
}

impl HandoffTable {
    /// Record a joiner waiting for live state. A re-request replaces the
    /// previous entry and restarts its clock.
    pub async fn insert(&self, room: RoomId, requester: Arc<ConnectionHandle>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            (room, requester.user_id),
            PendingHandoff {
                requester,
                created_at: Utc::now(),
            },
        );
    }

    /// Claim the pending entry for `(room, requester)`, if any. At most one
    /// caller wins; the answer path and the timeout path race through here.
    pub async fn take(&self, room: RoomId, requester: UserId) -> Option<PendingHandoff> {
        self.entries.write().await.remove(&(room, requester))
    }

    /// Drop the entry without answering (requester left).
    pub async fn discard(&self, room: RoomId, requester: UserId) {
        self.entries.write().await.remove(&(room, requester));
    }

    /// Drop entries older than `ttl`, returning how many were removed.
    pub async fn drop_expired(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(10));
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, pending| now - pending.created_at < ttl);
        before - entries.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
