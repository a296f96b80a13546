//! Broker-backed [`MessageQueue`](idh_queue::MessageQueue) implementations.
//!
//! The queue contract and the in-memory queue live in `idh-queue`. This module
//! provides the durable transport used in production.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConfig, RedisStreamsQueue};
