//! Concrete implementations of the domain ports.

pub mod blob;
pub mod queue_redis;
pub mod sqlite;

pub use queue_redis::RedisTaskQueue;
