//! HTTP rendering of the sync error taxonomy.
//!
//! WebSocket traffic reports failures in-band as `error` envelopes carrying a
//! wire code; the REST surface and upgrade denials go through [`AppError`],
//! which carries the same code so clients see one taxonomy on both paths.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lockstep_core::SyncError;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::BadFrame(_) => StatusCode::BAD_REQUEST,
            SyncError::Unauthenticated(_) | SyncError::SessionExpired => {
                StatusCode::UNAUTHORIZED
            }
            SyncError::Forbidden(_) | SyncError::GuestRoomMismatch => StatusCode::FORBIDDEN,
            SyncError::Conflict => StatusCode::CONFLICT,
            SyncError::StoreUnavailable(_) | SyncError::BusUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SyncError::HandoffTimeout => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.wire_code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));

        (self.status, body).into_response()
    }
}
