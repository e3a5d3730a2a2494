use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Control-plane state transitions a room can broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Play,
    Pause,
    Seek,
    Chat,
    Buffering,
    Join,
    Leave,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncAction::Play => "play",
            SyncAction::Pause => "pause",
            SyncAction::Seek => "seek",
            SyncAction::Chat => "chat",
            SyncAction::Buffering => "buffering",
            SyncAction::Join => "join",
            SyncAction::Leave => "leave",
        };
        f.write_str(name)
    }
}

/// The event published on the bus for every room state transition.
///
/// One node publishes, every node (including the originator) receives and
/// fans out to its local connections, skipping `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub action: SyncAction,
    pub user_id: UserId,
    pub username: String,
    pub current_time: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_buffering: Option<bool>,
}

impl SyncEvent {
    pub fn new(action: SyncAction, user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            action,
            user_id,
            username: username.into(),
            current_time: 0.0,
            timestamp: Utc::now(),
            chat_message: None,
            duration: None,
            playback_rate: None,
            is_buffering: None,
        }
    }

    pub fn at(mut self, current_time: f64) -> Self {
        self.current_time = current_time;
        self
    }
}

/// Optional per-event extras, nested under `data` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_buffering: Option<bool>,
}

impl SyncData {
    pub fn is_empty(&self) -> bool {
        self.chat_message.is_none()
            && self.duration.is_none()
            && self.playback_rate.is_none()
            && self.is_buffering.is_none()
    }
}

/// Client-facing payload of a `sync` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub action: SyncAction,
    pub current_time: f64,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SyncData>,
}

impl From<SyncEvent> for SyncPayload {
    fn from(event: SyncEvent) -> Self {
        let data = SyncData {
            chat_message: event.chat_message,
            duration: event.duration,
            playback_rate: event.playback_rate,
            is_buffering: event.is_buffering,
        };
        Self {
            action: event.action,
            current_time: event.current_time,
            timestamp: event.timestamp,
            user_id: event.user_id,
            username: event.username,
            data: if data.is_empty() { None } else { Some(data) },
        }
    }
}
