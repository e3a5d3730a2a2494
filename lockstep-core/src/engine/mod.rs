//! The sync engine: join/leave orchestration, inbound dispatch, the action
//! pipeline, and the live-state handoff.
//!
//! The engine never touches a socket type. It sees connections as
//! [`ConnectionHandle`]s from the registry and reaches the backend through
//! the [`SyncStore`] and [`EventBus`] ports, so every flow here runs
//! unchanged under the in-memory test bindings.

mod handoff;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lockstep_model::{
    ActionFrame, ClientFrame, Participant, PlaybackState, RoomId, RoomState, ServerFrame,
    SyncAction, SyncEvent, UserId, decode_client_frame,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::error::{Result, SyncError};
use crate::ports::{EventBus, SyncStore};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use handoff::HandoffTable;

/// Tunables for the engine's distributed interactions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lease TTL for the per-room mutation lock.
    pub room_lock_ttl: Duration,
    /// How long a joiner waits for `provide_state` before the stored-state
    /// fallback.
    pub handoff_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            room_lock_ttl: Duration::from_secs(5),
            handoff_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrates every room flow on this node.
pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    bus: Arc<dyn EventBus>,
    registry: Arc<ConnectionRegistry>,
    handoffs: HandoffTable,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SyncStore>,
        bus: Arc<dyn EventBus>,
        registry: Arc<ConnectionRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            handoffs: HandoffTable::default(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Begin node teardown: handoff timers stop, the listener/sweeper loops
    /// exit, and every open connection is asked to close so its read loop
    /// unwinds through the leave flow.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all();
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Admit an authenticated connection into a room.
    ///
    /// Ordering: count local peers, register locally (closing an older
    /// duplicate), register in the store, announce the join on the bus, then
    /// hand the joiner its initial state (live handoff when a local peer
    /// exists, stored fallback otherwise) and the participant roster. The
    /// caller then drives the read loop with [`handle_frame`] and finishes
    /// with [`leave`].
    ///
    /// [`handle_frame`]: SyncEngine::handle_frame
    /// [`leave`]: SyncEngine::leave
    pub async fn join(
        self: &Arc<Self>,
        room: RoomId,
        identity: &Identity,
        sender: mpsc::Sender<ServerFrame>,
    ) -> Result<Arc<ConnectionHandle>> {
        let local_peers = self.registry.count(room);

        let handle = ConnectionHandle::new(identity.user_id, identity.username.clone(), sender);
        if let Some(older) = self.registry.add(room, handle.clone()) {
            info!(
                room_id = %room,
                user_id = %identity.user_id,
                "duplicate connection; closing the older one"
            );
            older.close();
        }

        let is_host = self
            .store
            .list_participants(room)
            .await
            .unwrap_or_default()
            .is_empty();
        let participant = Participant::new(identity.user_id, identity.username.clone(), is_host);
        let register = self.store.add_participant(room, &participant).await;
        if let Err(err) = retry_write(register, || self.store.add_participant(room, &participant))
            .await
        {
            self.registry.remove_if(room, handle.user_id, handle.conn_id);
            return Err(err);
        }
        if let Err(err) = self
            .store
            .set_presence(identity.user_id, room, "active")
            .await
        {
            debug!(room_id = %room, user_id = %identity.user_id, error = %err, "presence write failed");
        }

        let state = self.stored_state_or_default(room).await;
        let event = SyncEvent::new(SyncAction::Join, identity.user_id, &identity.username)
            .at(state.current_time);
        self.publish(room, &event).await;

        if local_peers > 0 {
            // A local peer's media clock is fresher than the stored snapshot.
            self.start_handoff(room, handle.clone()).await;
        } else {
            handle
                .send(ServerFrame::State(RoomState::new(room, state)))
                .await;
        }

        let participants = self.store.list_participants(room).await.unwrap_or_default();
        handle.send(ServerFrame::Participants(participants)).await;

        info!(
            room_id = %room,
            user_id = %identity.user_id,
            username = %identity.username,
            local_peers,
            "participant joined"
        );
        Ok(handle)
    }

    /// Tear down a connection: drop local registration, pending handoff,
    /// stored participant and presence, then announce the leave.
    ///
    /// A connection replaced by a newer one for the same user skips the
    /// shared-state teardown; the newer connection owns those records.
    pub async fn leave(&self, room: RoomId, handle: &ConnectionHandle) {
        if !self.registry.remove_if(room, handle.user_id, handle.conn_id) {
            debug!(
                room_id = %room,
                user_id = %handle.user_id,
                "connection already superseded; skipping teardown"
            );
            return;
        }

        self.handoffs.discard(room, handle.user_id).await;

        if let Err(err) = self.store.remove_participant(room, handle.user_id).await {
            warn!(room_id = %room, user_id = %handle.user_id, error = %err, "failed to remove participant");
        }
        if let Err(err) = self.store.remove_presence(handle.user_id).await {
            debug!(user_id = %handle.user_id, error = %err, "failed to remove presence");
        }

        let state = self.stored_state_or_default(room).await;
        let event = SyncEvent::new(SyncAction::Leave, handle.user_id, handle.username.clone())
            .at(state.current_time);
        self.publish(room, &event).await;

        info!(room_id = %room, user_id = %handle.user_id, "participant left");
    }

    /// Process one inbound frame from the read loop.
    ///
    /// Decode failures answer the sender with an `error` envelope and keep
    /// the connection open. Every well-formed frame refreshes presence.
    pub async fn handle_frame(self: &Arc<Self>, room: RoomId, handle: &Arc<ConnectionHandle>, raw: &str) {
        let frame = match decode_client_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(room_id = %room, user_id = %handle.user_id, error = %err, "bad frame");
                handle
                    .send(ServerFrame::error("BAD_FRAME", err.to_string()))
                    .await;
                return;
            }
        };

        self.touch(room, handle.user_id).await;

        match frame {
            ClientFrame::ProvideState {
                requester_id,
                state,
            } => {
                // An incumbent answering a handoff; forward to the waiting
                // joiner. Late answers (after the timeout claimed the entry)
                // are dropped.
                match self.handoffs.take(room, requester_id).await {
                    Some(pending) => {
                        pending
                            .requester
                            .send(ServerFrame::State(RoomState::new(room, state)))
                            .await;
                    }
                    None => {
                        debug!(
                            room_id = %room,
                            requester_id = %requester_id,
                            "provide_state without a pending handoff; dropping"
                        );
                    }
                }
            }
            ClientFrame::RequestState => {
                // Joiner-side safety valve: the client re-requests initial
                // state, typically because its original handoff timed out.
                self.start_handoff(room, handle.clone()).await;
            }
            ClientFrame::Action(action) => {
                if action.action == SyncAction::Buffering {
                    let buffering = action.data.is_buffering.unwrap_or(true);
                    if let Err(err) = self
                        .store
                        .set_buffering(room, handle.user_id, buffering)
                        .await
                    {
                        debug!(room_id = %room, user_id = %handle.user_id, error = %err, "buffering flag update failed");
                    }
                }

                if let Err(err) = self.process_action(room, handle, action).await {
                    debug!(room_id = %room, user_id = %handle.user_id, error = %err, "action rejected");
                    handle
                        .send(ServerFrame::error(err.wire_code(), err.to_string()))
                        .await;
                }
            }
        }
    }

    /// Refresh the sender's presence; failures degrade silently.
    pub async fn touch(&self, room: RoomId, user: UserId) {
        if let Err(err) = self.store.update_presence(room, user).await {
            debug!(room_id = %room, user_id = %user, error = %err, "presence refresh failed");
        }
    }

    /// The action pipeline: mutate room state under the distributed lock and
    /// publish the enriched event. The lock is released on every exit path;
    /// if this process dies mid-flight the lease expires on its own.
    async fn process_action(
        &self,
        room: RoomId,
        handle: &ConnectionHandle,
        frame: ActionFrame,
    ) -> Result<()> {
        let user = handle.user_id;
        let acquired = self
            .store
            .acquire_room_lock(room, user, self.config.room_lock_ttl)
            .await?;
        if !acquired {
            return Err(SyncError::Conflict);
        }

        let result = self.apply_action(room, handle, &frame).await;

        if let Err(err) = self.store.release_room_lock(room, user).await {
            warn!(room_id = %room, error = %err, "lock release failed; lease will expire");
        }
        result
    }

    async fn apply_action(
        &self,
        room: RoomId,
        handle: &ConnectionHandle,
        frame: &ActionFrame,
    ) -> Result<()> {
        let user = handle.user_id;
        let mut state = self.store.get_state(room).await?;

        if let Some(duration) = frame.data.duration {
            state.duration = duration;
        }

        match frame.action {
            SyncAction::Play => {
                state.is_playing = true;
                if let Some(time) = frame.data.current_time
                    && time > 0.0
                {
                    state.set_position(time);
                }
            }
            SyncAction::Pause => {
                state.is_playing = false;
                if let Some(time) = frame.data.current_time
                    && time > 0.0
                {
                    state.set_position(time);
                }
            }
            SyncAction::Seek => {
                // 0.0 is an explicit seek to the start, not an absent field.
                if let Some(time) = frame.data.current_time {
                    state.set_position(time);
                }
            }
            SyncAction::Chat
            | SyncAction::Buffering
            | SyncAction::Join
            | SyncAction::Leave => {}
        }

        if let Some(rate) = frame.data.playback_rate {
            state.playback_rate = rate;
        }
        state.touch(user, Utc::now());

        let persisted = self.store.set_state(room, &state).await;
        retry_write(persisted, || self.store.set_state(room, &state)).await?;

        let event = SyncEvent {
            action: frame.action,
            user_id: user,
            username: handle.username.clone(),
            current_time: state.current_time,
            timestamp: state.last_updated,
            chat_message: frame.data.chat_message.clone(),
            duration: frame.data.duration,
            playback_rate: frame.data.playback_rate,
            is_buffering: frame.data.is_buffering,
        };
        self.publish(room, &event).await;
        Ok(())
    }

    /// Ask a local peer for its live playback state on behalf of
    /// `requester`, arming the stored-state fallback timer. With no local
    /// peer available the stored state is sent immediately.
    async fn start_handoff(self: &Arc<Self>, room: RoomId, requester: Arc<ConnectionHandle>) {
        let Some(peer) = self.registry.any_peer(room, requester.user_id) else {
            let state = self.stored_state_or_default(room).await;
            requester
                .send(ServerFrame::State(RoomState::new(room, state)))
                .await;
            return;
        };

        debug!(
            room_id = %room,
            requester_id = %requester.user_id,
            peer_id = %peer.user_id,
            "requesting live state from peer"
        );
        let requester_id = requester.user_id;
        self.handoffs.insert(room, requester).await;
        peer.send(ServerFrame::RequestState { requester_id }).await;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = engine.shutdown.cancelled() => return,
                () = tokio::time::sleep(engine.config.handoff_timeout) => {}
            }
            if let Some(pending) = engine.handoffs.take(room, requester_id).await {
                debug!(
                    room_id = %room,
                    requester_id = %requester_id,
                    "handoff timed out; sending stored state"
                );
                let state = engine.stored_state_or_default(room).await;
                pending
                    .requester
                    .send(ServerFrame::State(RoomState::new(room, state)))
                    .await;
            }
        });
    }

    /// Periodic maintenance: evict stale participants in locally-served
    /// rooms and drop pending handoffs past their TTL. Emits no wire events.
    pub async fn sweep(&self) {
        let rooms = self.registry.rooms();
        match self.store.cleanup_expired(&rooms).await {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, "evicted stale participants"),
            Err(err) => warn!(error = %err, "presence sweep failed"),
        }

        let dropped = self.handoffs.drop_expired(self.config.handoff_timeout).await;
        if dropped > 0 {
            debug!(dropped, "dropped stale pending handoffs");
        }
    }

    async fn stored_state_or_default(&self, room: RoomId) -> PlaybackState {
        match self.store.get_state(room).await {
            Ok(state) => state,
            Err(err) => {
                warn!(room_id = %room, error = %err, "state read failed; using default");
                PlaybackState::default()
            }
        }
    }

    /// Best-effort publish with a single retry.
    async fn publish(&self, room: RoomId, event: &SyncEvent) {
        if let Err(first) = self.bus.publish(room, event).await {
            warn!(room_id = %room, action = %event.action, error = %first, "publish failed; retrying");
            if let Err(second) = self.bus.publish(room, event).await {
                warn!(room_id = %room, action = %event.action, error = %second, "event lost after retry");
            }
        }
    }
}

/// Retry a failed store write once, only for transient backend failures.
async fn retry_write<F, Fut>(first: Result<()>, retry: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    match first {
        Err(SyncError::StoreUnavailable(_)) => retry().await,
        other => other,
    }
}
