//! Read-only REST surface over room session state.

use axum::{Json, extract::Path, extract::State};
use chrono::Utc;
use lockstep_model::{Participant, RoomId, RoomState};

use crate::app_state::AppState;
use crate::errors::AppResult;

/// GET /api/v1/sync/rooms/{room_id}/state
///
/// The stored snapshot only moves on explicit actions, so for a playing room
/// the playhead is projected forward to now before it is reported. The
/// stored record itself is untouched; in-protocol `state` frames keep the
/// raw snapshot.
pub async fn room_state_handler(
    Path(room_id): Path<RoomId>,
    State(state): State<AppState>,
) -> AppResult<Json<RoomState>> {
    let playback = state.engine.store().get_state(room_id).await?;
    let projected = playback.projected_position(Utc::now());
    let mut view = RoomState::new(room_id, playback);
    view.current_time = projected;
    Ok(Json(view))
}

/// GET /api/v1/sync/rooms/{room_id}/participants
pub async fn room_participants_handler(
    Path(room_id): Path<RoomId>,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Participant>>> {
    let participants = state.engine.store().list_participants(room_id).await?;
    Ok(Json(participants))
}
