//! Reconciliation of jobs left in `RUNNING` by an interrupted execution.
//!
//! The engine never does this itself: a job stuck in `RUNNING` is only ever
//! resolved by an operator running the sweep.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use idh_core::{JobId, JobRecord, JobStatus, JobUpdate};

use crate::jobs::{JobStore, StoreError};

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Jobs found in `RUNNING` past the age limit.
    pub stale: Vec<JobRecord>,
    /// Jobs marked `FAILED` by this sweep.
    pub marked_failed: Vec<JobId>,
}

/// Find jobs whose last update is older than `older_than` and that are still
/// `RUNNING`; with `mark_failed`, record them as `FAILED`.
pub fn sweep_stale<S>(
    store: &S,
    older_than: Duration,
    mark_failed: bool,
) -> Result<SweepReport, StoreError>
where
    S: JobStore + ?Sized,
{
    let age = chrono::Duration::from_std(older_than)
        .map_err(|e| StoreError::Storage(format!("invalid sweep age: {e}")))?;
    let stale = store.find_stale_running(Utc::now() - age)?;
    info!(count = stale.len(), older_than_secs = older_than.as_secs(), "stale running jobs");

    let mut marked_failed = Vec::new();
    if mark_failed {
        let message = format!(
            "execution interrupted: no terminal status after {} s",
            older_than.as_secs()
        );
        let fail = JobUpdate::fail(message);
        for job in &stale {
            // A worker may have finished it since the listing.
            match store.update_if(job.id, JobStatus::Running, &fail)? {
                Some(_) => {
                    warn!(job_id = %job.id, "stale job marked failed");
                    marked_failed.push(job.id);
                }
                None => info!(job_id = %job.id, "stale job settled before sweep; left as is"),
            }
        }
    }

    Ok(SweepReport {
        stale,
        marked_failed,
    })
}
