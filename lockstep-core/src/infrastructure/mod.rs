//! Concrete backend bindings for the port traits.

pub mod redis;

pub use redis::{RedisEventBus, RedisSyncStore};
