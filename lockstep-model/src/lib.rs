//! Core data model definitions shared across Lockstep crates.
//!
//! Everything that crosses a process boundary lives here: typed identifiers,
//! the authoritative playback state, participant records, the sync event
//! carried on the bus, and the client-facing frame envelopes together with
//! their codec.
#![allow(missing_docs)]

pub mod codec;
pub mod error;
pub mod event;
pub mod frames;
pub mod ids;
pub mod participant;
pub mod playback;

pub use codec::{decode_client_frame, encode_server_frame};
pub use error::FrameError;
pub use event::{SyncAction, SyncData, SyncEvent, SyncPayload};
pub use frames::{ActionData, ActionFrame, ClientFrame, RoomState, ServerFrame};
pub use ids::{RoomId, UserId};
pub use participant::Participant;
pub use playback::PlaybackState;

/// Maximum accepted chat message length, in bytes.
pub const MAX_CHAT_BYTES: usize = 4096;
