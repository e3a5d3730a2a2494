use thiserror::Error;

/// Decode/validation failures for inbound frames.
///
/// Every variant maps to the `BadFrame` error kind on the wire; the message
/// is sent back to the offending client, which stays connected.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame carries neither a 'type' nor an 'action' discriminator")]
    MissingDiscriminator,

    #[error("unknown frame type '{0}'")]
    UnknownType(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("field '{field}' is missing or has the wrong type")]
    BadField { field: &'static str },

    #[error("'{field}' must be a finite, non-negative number")]
    NegativeTime { field: &'static str },

    #[error("playback_rate must be positive")]
    NonPositiveRate,

    #[error("chat message is empty")]
    EmptyChat,

    #[error("chat message exceeds {max} bytes")]
    ChatTooLong { max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
