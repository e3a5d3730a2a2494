use axum::{Json, extract::State, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;

use crate::app_state::AppState;

/// GET /health — 200 only when both the store and the bus answer a probe,
/// i.e. this node can admit new connections.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let store_ok = state.engine.store().ping().await.is_ok();
    let bus_ok = state.engine.bus().ping().await.is_ok();

    let status = if store_ok && bus_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = Json(json!({
        "status": if status == StatusCode::OK { "ok" } else { "degraded" },
        "store": store_ok,
        "bus": bus_ok,
    }));

    (status, body).into_response()
}
