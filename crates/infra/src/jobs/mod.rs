//! Job store: typed access to the persisted `analysis_results` rows.
//!
//! ## Components
//!
//! - `JobStore`: read-by-id and transactional partial updates
//! - `InMemoryJobStore`: tests/dev
//! - `PostgresJobStore`: the durable store

pub mod postgres;
pub mod store;

pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStore, StoreError};
