//! WebSocket transport binding.
//!
//! Credentials are resolved before the protocol upgrade; a denied connection
//! gets a plain HTTP error and no socket. After the upgrade, all writes to
//! the socket funnel through one writer task fed by the connection's bounded
//! channel, and the read loop feeds inbound frames to the engine until the
//! client goes away or the connection is superseded.

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use lockstep_core::auth::{Credentials, Identity};
use lockstep_core::registry::OUTBOUND_BUFFER;
use lockstep_model::{RoomId, ServerFrame, encode_server_frame};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::app_state::AppState;
use crate::errors::AppError;

/// GET /ws/room/{room_id} — upgrade to the sync protocol.
///
/// The token travels as a query parameter because upgrade requests are plain
/// GETs and cannot carry headers reliably from browser clients.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<RoomId>,
    Query(credentials): Query<Credentials>,
    State(state): State<AppState>,
) -> Response {
    let identity = match state.authenticator.authenticate(room_id, &credentials).await {
        Ok(identity) => identity,
        Err(err) => {
            debug!(room_id = %room_id, error = %err, "connection refused");
            return AppError::from(err).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, room_id, identity, state))
}

async fn handle_socket(socket: WebSocket, room: RoomId, identity: Identity, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    // Single writer per socket; the channel is the write serialization.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match encode_server_frame(&frame) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to encode outbound frame");
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let handle = match state.engine.join(room, &identity, tx).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(room_id = %room, user_id = %identity.user_id, error = %err, "join failed");
            writer.abort();
            return;
        }
    };

    let cancel = handle.cancel_token().clone();
    loop {
        tokio::select! {
            // Superseded by a newer connection for the same user, or node
            // shutdown.
            () = cancel.cancelled() => break,
            message = ws_receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    state.engine.handle_frame(room, &handle, text.as_str()).await;
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => state.engine.handle_frame(room, &handle, text).await,
                    Err(_) => {
                        handle
                            .send(ServerFrame::error("BAD_FRAME", "binary frame is not UTF-8"))
                            .await;
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    state.engine.touch(room, handle.user_id).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(room_id = %room, user_id = %handle.user_id, error = %err, "socket error");
                    break;
                }
            },
        }
    }

    state.engine.leave(room, &handle).await;
}
