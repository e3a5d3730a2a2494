//! Backend capability seams.
//!
//! The engine depends on these traits only; concrete bindings are injected at
//! process init. The Redis bindings live in [`crate::infrastructure`], the
//! test suites provide in-memory ones.

pub mod bus;
pub mod store;

pub use bus::{BusMessage, BusStream, EventBus};
pub use store::SyncStore;
