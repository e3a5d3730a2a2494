//! In-memory bindings of the store and bus ports for engine tests.
//!
//! The store mirrors the Redis layout semantics (default-on-miss state,
//! lease with expiry, participant staleness) without a backend; the bus is a
//! broadcast channel shared by every simulated node.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use lockstep_core::error::{Result, SyncError};
use lockstep_core::ports::{BusMessage, BusStream, EventBus, SyncStore};
use lockstep_core::registry::ConnectionRegistry;
use lockstep_core::{EngineConfig, Identity, SyncEngine};
use lockstep_model::{Participant, PlaybackState, RoomId, ServerFrame, SyncEvent, UserId};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

#[derive(Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<RoomId, PlaybackState>>,
    participants: Mutex<HashMap<RoomId, HashMap<UserId, Participant>>>,
    presences: Mutex<HashMap<UserId, (RoomId, String)>>,
    locks: Mutex<HashMap<RoomId, (UserId, Instant)>>,
    presence_ttl: Duration,
    /// Fail this many upcoming `set_state` calls.
    pub fail_set_state: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            presence_ttl: Duration::from_secs(60),
            ..Self::default()
        })
    }

    pub fn state(&self, room: RoomId) -> Option<PlaybackState> {
        self.states.lock().unwrap().get(&room).cloned()
    }

    pub fn put_state(&self, room: RoomId, state: PlaybackState) {
        self.states.lock().unwrap().insert(room, state);
    }

    pub fn participant(&self, room: RoomId, user: UserId) -> Option<Participant> {
        self.participants
            .lock()
            .unwrap()
            .get(&room)?
            .get(&user)
            .cloned()
    }

    pub fn presence(&self, user: UserId) -> Option<(RoomId, String)> {
        self.presences.lock().unwrap().get(&user).cloned()
    }

    /// Take the room lease out-of-band, as a competing node would.
    pub fn seize_lock(&self, room: RoomId, holder: UserId, ttl: Duration) {
        self.locks
            .lock()
            .unwrap()
            .insert(room, (holder, Instant::now() + ttl));
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn get_state(&self, room: RoomId) -> Result<PlaybackState> {
        let mut states = self.states.lock().unwrap();
        Ok(states.entry(room).or_default().clone())
    }

    async fn set_state(&self, room: RoomId, state: &PlaybackState) -> Result<()> {
        if self
            .fail_set_state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SyncError::StoreUnavailable("injected failure".into()));
        }
        self.states.lock().unwrap().insert(room, state.clone());
        Ok(())
    }

    async fn add_participant(&self, room: RoomId, participant: &Participant) -> Result<()> {
        self.participants
            .lock()
            .unwrap()
            .entry(room)
            .or_default()
            .insert(participant.user_id, participant.clone());
        Ok(())
    }

    async fn remove_participant(&self, room: RoomId, user: UserId) -> Result<()> {
        let mut rooms = self.participants.lock().unwrap();
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&user);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
        Ok(())
    }

    async fn update_presence(&self, room: RoomId, user: UserId) -> Result<()> {
        if let Some(members) = self.participants.lock().unwrap().get_mut(&room)
            && let Some(participant) = members.get_mut(&user)
        {
            participant.touch(Utc::now());
        }
        Ok(())
    }

    async fn set_buffering(&self, room: RoomId, user: UserId, buffering: bool) -> Result<()> {
        if let Some(members) = self.participants.lock().unwrap().get_mut(&room)
            && let Some(participant) = members.get_mut(&user)
        {
            participant.is_buffering = buffering;
        }
        Ok(())
    }

    async fn list_participants(&self, room: RoomId) -> Result<Vec<Participant>> {
        Ok(self
            .participants
            .lock()
            .unwrap()
            .get(&room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_presence(&self, user: UserId, room: RoomId, tag: &str) -> Result<()> {
        self.presences
            .lock()
            .unwrap()
            .insert(user, (room, tag.to_string()));
        Ok(())
    }

    async fn remove_presence(&self, user: UserId) -> Result<()> {
        self.presences.lock().unwrap().remove(&user);
        Ok(())
    }

    async fn acquire_room_lock(
        &self,
        room: RoomId,
        holder: UserId,
        ttl: Duration,
    ) -> Result<bool> {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        match locks.get(&room) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                locks.insert(room, (holder, now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_room_lock(&self, room: RoomId, holder: UserId) -> Result<()> {
        let mut locks = self.locks.lock().unwrap();
        if locks.get(&room).is_some_and(|(owner, _)| *owner == holder) {
            locks.remove(&room);
        }
        Ok(())
    }

    async fn cleanup_expired(&self, rooms: &[RoomId]) -> Result<u32> {
        let now = Utc::now();
        let ttl = self.presence_ttl.as_secs();
        let mut evicted = 0;
        let mut all = self.participants.lock().unwrap();
        for room in rooms {
            if let Some(members) = all.get_mut(room) {
                let before = members.len();
                members.retain(|_, participant| !participant.is_stale(now, ttl));
                evicted += (before - members.len()) as u32;
            }
        }
        Ok(evicted)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MemoryBus {
    tx: broadcast::Sender<BusMessage>,
    published: Mutex<Vec<(RoomId, SyncEvent)>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        Arc::new(Self {
            tx,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<(RoomId, SyncEvent)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, room: RoomId, event: &SyncEvent) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((room, event.clone()));
        let _ = self.tx.send(BusMessage {
            room,
            event: event.clone(),
        });
        Ok(())
    }

    async fn subscribe(&self) -> Result<BusStream> {
        let stream = BroadcastStream::new(self.tx.subscribe())
            .filter_map(|message| async move { message.ok() });
        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// One simulated sync node: engine + registry + running bus listener.
pub struct TestNode {
    pub engine: Arc<SyncEngine>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<MemoryBus>,
}

impl TestNode {
    pub async fn start(
        store: Arc<MemoryStore>,
        bus: Arc<MemoryBus>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            bus.clone(),
            registry.clone(),
            config,
        ));
        tokio::spawn(lockstep_core::listener::run_bus_listener(
            bus.clone() as Arc<dyn EventBus>,
            registry.clone(),
            engine.shutdown_token().clone(),
        ));
        // Let the listener's subscription settle before traffic flows.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Self {
            engine,
            registry,
            store,
            bus,
        }
    }

    /// Admit a connection for a fresh authenticated user.
    pub async fn connect(
        &self,
        room: RoomId,
        username: &str,
    ) -> (
        Arc<lockstep_core::ConnectionHandle>,
        mpsc::Receiver<ServerFrame>,
        Identity,
    ) {
        let identity = Identity {
            user_id: UserId::generate(),
            username: username.to_string(),
            is_guest: false,
        };
        let (tx, rx) = mpsc::channel(100);
        let handle = self
            .engine
            .join(room, &identity, tx)
            .await
            .expect("join should succeed");
        (handle, rx, identity)
    }
}

/// Receive the next frame or fail the test.
pub async fn recv_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
}

/// Drain everything currently queued, after letting in-flight fan-out land.
pub async fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
