//! `idh-queue` — broker-agnostic delivery mechanics.
//!
//! The worker consumes task messages from a durable queue with **at-least-once**
//! delivery: a message may arrive more than once (crash before ack, requeue after
//! a transient failure), so everything downstream must tolerate duplicates.
//!
//! This crate only defines the contract ([`MessageQueue`]) and an in-memory
//! implementation for tests/dev. Broker-backed implementations live in
//! `idh-infra`.

pub mod delivery;
pub mod in_memory;
pub mod queue;

pub use delivery::{Delivery, DeliveryTag};
pub use in_memory::InMemoryQueue;
pub use queue::{MessageQueue, QueueError};
