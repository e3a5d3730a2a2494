//! Core library for the Lockstep sync node.
//!
//! Hosts everything between the transport and the coordination backend: the
//! connection registry with per-connection write serialization, the session
//! authenticator, the sync engine (join/leave flows, action pipeline,
//! live-state handoff), the bus listener fanning cross-node events out to
//! local connections, and the presence sweeper. Backend access goes through
//! the port traits in [`ports`]; the Redis bindings live in
//! [`infrastructure`].
#![allow(missing_docs)]

pub mod auth;
pub mod engine;
pub mod error;
pub mod infrastructure;
pub mod listener;
pub mod ports;
pub mod registry;
pub mod sweeper;

pub use auth::{Credentials, Identity, SessionAuthenticator};
pub use engine::{EngineConfig, SyncEngine};
pub use error::{Result, SyncError};
pub use registry::{ConnectionHandle, ConnectionRegistry};
