//! Job store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use idh_core::{JobId, JobRecord, JobStatus, JobUpdate};

/// Typed access to `analysis_results` rows.
///
/// Reads and partial updates only; rows are created by the producer.
pub trait JobStore: Send + Sync {
    /// Read one job. `Ok(None)` when the row does not exist.
    fn fetch(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Apply `update` in one transaction, refreshing `updated_at`.
    ///
    /// Returns the row as committed.
    fn update(&self, id: JobId, update: &JobUpdate) -> Result<JobRecord, StoreError>;

    /// Like [`update`](Self::update), but only while the row is in `expected`.
    ///
    /// `Ok(None)` when the row is missing or has moved on; nothing is written.
    fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: &JobUpdate,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Cheap connectivity check.
    fn ping(&self) -> Result<(), StoreError>;

    /// Jobs in `RUNNING` whose last update is older than `cutoff`.
    fn find_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("unreadable job row {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn fetch(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        (**self).fetch(id)
    }

    fn update(&self, id: JobId, update: &JobUpdate) -> Result<JobRecord, StoreError> {
        (**self).update(id, update)
    }

    fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: &JobUpdate,
    ) -> Result<Option<JobRecord>, StoreError> {
        (**self).update_if(id, expected, update)
    }

    fn ping(&self) -> Result<(), StoreError> {
        (**self).ping()
    }

    fn find_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        (**self).find_stale_running(cutoff)
    }
}

/// In-memory job store for tests/dev.
///
/// Keeps a log of every committed update so tests can inspect the exact
/// sequence of writes.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    writes: RwLock<Vec<(JobId, JobUpdate)>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a row, as the producer would. Not logged as a write.
    pub fn insert(&self, record: JobRecord) {
        self.jobs.write().unwrap().insert(record.id, record);
    }

    /// Every committed update, in order.
    pub fn writes(&self) -> Vec<(JobId, JobUpdate)> {
        self.writes.read().unwrap().clone()
    }

    /// Statuses written for `id`, in order.
    pub fn status_history(&self, id: JobId) -> Vec<JobStatus> {
        self.writes
            .read()
            .unwrap()
            .iter()
            .filter(|(job, _)| *job == id)
            .filter_map(|(_, update)| update.status)
            .collect()
    }
}

impl JobStore for InMemoryJobStore {
    fn fetch(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    fn update(&self, id: JobId, update: &JobUpdate) -> Result<JobRecord, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let record = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(update, Utc::now());
        self.writes.write().unwrap().push((id, update.clone()));
        Ok(record.clone())
    }

    fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: &JobUpdate,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let Some(record) = jobs.get_mut(&id).filter(|r| r.status == expected) else {
            return Ok(None);
        };
        record.apply(update, Utc::now());
        self.writes.write().unwrap().push((id, update.clone()));
        Ok(Some(record.clone()))
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn find_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut stale: Vec<JobRecord> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running && j.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.id);
        Ok(stale)
    }
}
