use lockstep_model::FrameError;
use thiserror::Error;

/// Error taxonomy of the sync node.
///
/// Per-connection failures (`BadFrame`, `Conflict`) are reported to the
/// offending sender and never affect the rest of the room. Backend failures
/// (`StoreUnavailable`, `BusUnavailable`) degrade per the read/write policy
/// of the component that hit them.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("bad frame: {0}")]
    BadFrame(#[from] FrameError),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("guest session is bound to a different room")]
    GuestRoomMismatch,

    #[error("session expired")]
    SessionExpired,

    #[error("room is locked by another user")]
    Conflict,

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("event bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("live-state handoff timed out")]
    HandoffTimeout,
}

impl SyncError {
    /// The `code` carried by an outbound `error` envelope.
    pub fn wire_code(&self) -> &'static str {
        match self {
            SyncError::BadFrame(_) => "BAD_FRAME",
            SyncError::Unauthenticated(_) => "UNAUTHENTICATED",
            SyncError::Forbidden(_) | SyncError::GuestRoomMismatch => "FORBIDDEN",
            SyncError::SessionExpired => "SESSION_EXPIRED",
            SyncError::Conflict => "CONFLICT",
            SyncError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            SyncError::BusUnavailable(_) => "BUS_UNAVAILABLE",
            SyncError::HandoffTimeout => "HANDOFF_TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
