//! Inbound frame decoding and validation.
//!
//! Decoding is two-stage: the raw text is parsed into a JSON value, the
//! discriminator (`type` or `action`) selects the shape, and only then is the
//! typed parse attempted. This keeps malformed frames distinguishable from
//! well-formed frames with invalid field values, and both map to `BadFrame`
//! on the wire without closing the connection.

use serde_json::Value;

use crate::MAX_CHAT_BYTES;
use crate::error::{FrameError, Result};
use crate::event::SyncAction;
use crate::frames::{ActionData, ActionFrame, ClientFrame, ServerFrame};
use crate::ids::UserId;
use crate::playback::PlaybackState;

/// Decode and validate one inbound client frame.
pub fn decode_client_frame(raw: &str) -> Result<ClientFrame> {
    let value: Value = serde_json::from_str(raw)?;
    let object = value.as_object().ok_or(FrameError::NotAnObject)?;

    if let Some(kind) = object.get("type") {
        let kind = kind
            .as_str()
            .ok_or(FrameError::BadField { field: "type" })?;
        return decode_control_frame(kind, object);
    }

    if object.contains_key("action") {
        return decode_action_frame(object);
    }

    Err(FrameError::MissingDiscriminator)
}

/// Encode one outbound envelope as JSON text.
pub fn encode_server_frame(frame: &ServerFrame) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

fn decode_control_frame(
    kind: &str,
    object: &serde_json::Map<String, Value>,
) -> Result<ClientFrame> {
    match kind {
        "request_state" => Ok(ClientFrame::RequestState),
        "provide_state" => {
            let requester_id = object
                .get("requester_id")
                .cloned()
                .and_then(|v| serde_json::from_value::<UserId>(v).ok())
                .ok_or(FrameError::BadField {
                    field: "requester_id",
                })?;
            let state = object
                .get("state")
                .cloned()
                .and_then(|v| serde_json::from_value::<PlaybackState>(v).ok())
                .ok_or(FrameError::BadField { field: "state" })?;
            validate_state(&state)?;
            Ok(ClientFrame::ProvideState {
                requester_id,
                state,
            })
        }
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

fn decode_action_frame(object: &serde_json::Map<String, Value>) -> Result<ClientFrame> {
    let action_value = object.get("action").cloned().unwrap_or(Value::Null);
    let action_name = action_value
        .as_str()
        .ok_or(FrameError::BadField { field: "action" })?
        .to_string();
    let action: SyncAction = serde_json::from_value(action_value)
        .map_err(|_| FrameError::UnknownAction(action_name))?;

    let data: ActionData = match object.get("data") {
        None | Some(Value::Null) => ActionData::default(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|_| FrameError::BadField { field: "data" })?,
    };

    let frame = ActionFrame { action, data };
    validate_action(&frame)?;
    Ok(ClientFrame::Action(frame))
}

fn validate_action(frame: &ActionFrame) -> Result<()> {
    if let Some(current_time) = frame.data.current_time {
        require_non_negative(current_time, "current_time")?;
    }
    if let Some(duration) = frame.data.duration {
        require_non_negative(duration, "duration")?;
    }
    if let Some(rate) = frame.data.playback_rate
        && !(rate.is_finite() && rate > 0.0)
    {
        return Err(FrameError::NonPositiveRate);
    }

    if frame.action == SyncAction::Chat {
        let message = frame
            .data
            .chat_message
            .as_deref()
            .ok_or(FrameError::BadField {
                field: "chat_message",
            })?;
        if message.is_empty() {
            return Err(FrameError::EmptyChat);
        }
        if message.len() > MAX_CHAT_BYTES {
            return Err(FrameError::ChatTooLong {
                max: MAX_CHAT_BYTES,
            });
        }
    }

    Ok(())
}

fn validate_state(state: &PlaybackState) -> Result<()> {
    require_non_negative(state.current_time, "current_time")?;
    require_non_negative(state.duration, "duration")?;
    if !(state.playback_rate.is_finite() && state.playback_rate > 0.0) {
        return Err(FrameError::NonPositiveRate);
    }
    Ok(())
}

fn require_non_negative(value: f64, field: &'static str) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FrameError::NegativeTime { field })
    }
}
