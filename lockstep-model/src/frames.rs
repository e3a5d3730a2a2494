use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{SyncAction, SyncPayload};
use crate::ids::{RoomId, UserId};
use crate::participant::Participant;
use crate::playback::PlaybackState;

/// Optional fields carried by a direct action frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_buffering: Option<bool>,
}

/// A direct action frame: `{"action": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFrame {
    pub action: SyncAction,
    #[serde(default)]
    pub data: ActionData,
}

/// Every inbound frame a client may send.
///
/// Closed sum: typed control frames carry a `type` discriminator, action
/// frames carry `action`. The codec performs the discriminator dispatch so
/// that a frame matching neither shape is a precise decode error rather than
/// an untagged-enum fallthrough.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Joiner-side request to (re-)run the live-state handoff.
    RequestState,
    /// An incumbent answering a handoff with its live playback state.
    ProvideState {
        requester_id: UserId,
        state: PlaybackState,
    },
    /// `play` / `pause` / `seek` / `chat` / `buffering` / `join` / `leave`.
    Action(ActionFrame),
}

/// A room's authoritative state as sent to clients in a `state` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub room_id: RoomId,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub last_updated: DateTime<Utc>,
    pub updated_by: UserId,
}

impl RoomState {
    pub fn new(room_id: RoomId, state: PlaybackState) -> Self {
        Self {
            room_id,
            is_playing: state.is_playing,
            current_time: state.current_time,
            duration: state.duration,
            playback_rate: state.playback_rate,
            last_updated: state.last_updated,
            updated_by: state.updated_by,
        }
    }
}

impl From<RoomState> for PlaybackState {
    fn from(state: RoomState) -> Self {
        Self {
            is_playing: state.is_playing,
            current_time: state.current_time,
            duration: state.duration,
            playback_rate: state.playback_rate,
            last_updated: state.last_updated,
            updated_by: state.updated_by,
        }
    }
}

/// Every outbound envelope a sync node may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Sync(SyncPayload),
    State(RoomState),
    Participants(Vec<Participant>),
    RequestState { requester_id: UserId },
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
