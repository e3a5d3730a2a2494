//! Local connection registry.
//!
//! Tracks every open connection on this node, keyed `(room_id, user_id)`.
//! Each connection owns a bounded channel draining into a single writer task
//! on the transport side, so all writes to one socket form a totally ordered
//! stream. `send` bounds how long a slow consumer can stall a fan-out: on
//! timeout the frame is dropped with a warning and the connection stays open.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lockstep_model::{RoomId, ServerFrame, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// How long one connection may block a write before the frame is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound frame capacity per connection before sends start timing out.
pub const OUTBOUND_BUFFER: usize = 100;

/// Handle to one open connection.
///
/// The `conn_id` distinguishes successive connections of the same user; the
/// leave path uses it so that a replaced connection's teardown cannot remove
/// its successor's registration.
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub user_id: UserId,
    pub username: String,
    sender: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        sender: mpsc::Sender<ServerFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn_id: Uuid::new_v4(),
            user_id,
            username: username.into(),
            sender,
            cancel: CancellationToken::new(),
        })
    }

    /// Queue a frame for this connection's writer task.
    ///
    /// Returns `false` when the frame was dropped (full buffer past the
    /// timeout, or the writer is gone).
    pub async fn send(&self, frame: ServerFrame) -> bool {
        match self.sender.send_timeout(frame, SEND_TIMEOUT).await {
            Ok(()) => true,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(
                    user_id = %self.user_id,
                    conn_id = %self.conn_id,
                    "outbound buffer full; dropping frame"
                );
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                debug!(
                    user_id = %self.user_id,
                    conn_id = %self.conn_id,
                    "writer task gone; dropping frame"
                );
                false
            }
        }
    }

    /// Ask the transport-side read loop to terminate.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// All open connections on this node.
#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, HashMap<UserId, Arc<ConnectionHandle>>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("room_count", &self.rooms.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning the displaced one when the user was
    /// already connected (the caller closes it).
    pub fn add(
        &self,
        room: RoomId,
        handle: Arc<ConnectionHandle>,
    ) -> Option<Arc<ConnectionHandle>> {
        self.rooms
            .entry(room)
            .or_default()
            .insert(handle.user_id, handle)
    }

    /// Remove the user's connection iff it is still `conn_id`.
    ///
    /// Returns `true` when an entry was removed. A replaced connection's
    /// teardown finds a different `conn_id` and leaves the registry alone.
    pub fn remove_if(&self, room: RoomId, user: UserId, conn_id: Uuid) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.rooms.get_mut(&room) {
            if entry
                .get(&user)
                .is_some_and(|handle| handle.conn_id == conn_id)
            {
                entry.remove(&user);
                removed = true;
            }
        }
        self.rooms.remove_if(&room, |_, users| users.is_empty());
        removed
    }

    pub fn get(&self, room: RoomId, user: UserId) -> Option<Arc<ConnectionHandle>> {
        self.rooms.get(&room)?.get(&user).cloned()
    }

    /// Number of connections this node holds for the room.
    pub fn count(&self, room: RoomId) -> usize {
        self.rooms.get(&room).map_or(0, |users| users.len())
    }

    /// Rooms with at least one local connection.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| *entry.key()).collect()
    }

    /// Pick one local connection for the room other than `exclude`.
    ///
    /// Map iteration order is an acceptable deterministic tiebreak for peer
    /// selection.
    pub fn any_peer(&self, room: RoomId, exclude: UserId) -> Option<Arc<ConnectionHandle>> {
        self.rooms.get(&room)?.values().find_map(|handle| {
            if handle.user_id == exclude {
                None
            } else {
                Some(handle.clone())
            }
        })
    }

    /// Send a frame to one user's connection, if present on this node.
    pub async fn send(&self, room: RoomId, user: UserId, frame: ServerFrame) -> bool {
        match self.get(room, user) {
            Some(handle) => handle.send(frame).await,
            None => false,
        }
    }

    /// Ask every open connection to terminate. Used at node shutdown so the
    /// read loops exit and graceful drain can finish.
    pub fn close_all(&self) {
        for room in self.rooms.iter() {
            for handle in room.values() {
                handle.close();
            }
        }
    }

    /// Deliver a frame to every local connection of the room except
    /// `exclude` (the originator of the event).
    pub async fn broadcast(&self, room: RoomId, exclude: UserId, frame: ServerFrame) {
        // Snapshot under the shard lock, send outside it.
        let targets: Vec<Arc<ConnectionHandle>> = match self.rooms.get(&room) {
            Some(users) => users
                .values()
                .filter(|handle| handle.user_id != exclude)
                .cloned()
                .collect(),
            None => return,
        };

        for handle in targets {
            handle.send(frame.clone()).await;
        }
    }
}
