//! Infrastructure layer: job store, broker adapter, engine, consumer loop, config.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod jobs;
pub mod sweep;

pub use config::{ConfigError, WorkerConfig};
pub use consumer::{ConsumerError, ConsumerHandle, ConsumerStats, QueueConsumer};
pub use engine::{JobEngine, JobOutcome, ProcessError};
pub use jobs::{InMemoryJobStore, JobStore, StoreError};

#[cfg(test)]
mod integration_tests;
