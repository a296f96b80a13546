//! `idh-core` — job model for the analysis worker.
//!
//! This crate contains the **pure** pieces of the worker (no IO): the persisted
//! job record and its status state machine, the task descriptor carried by queue
//! messages, and the error classes that decide how a delivery is settled.

pub mod error;
pub mod id;
pub mod job;
pub mod task;

pub use error::{Disposition, ErrorClass};
pub use id::{DataSourceId, JobId};
pub use job::{JobRecord, JobStatus, JobUpdate, ParseStatusError};
pub use task::{DecodeError, TaskDescriptor};
