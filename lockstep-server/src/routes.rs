use axum::{Router, http::HeaderValue, routing::get};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::app_state::AppState;
use crate::handlers::{health, rooms, ws};

/// Assemble the node's full route surface.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/ws/room/{room_id}", get(ws::websocket_handler))
        .route(
            "/api/v1/sync/rooms/{room_id}/state",
            get(rooms::room_state_handler),
        )
        .route(
            "/api/v1/sync/rooms/{room_id}/participants",
            get(rooms::room_participants_handler),
        )
        .route("/health", get(health::health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
}
