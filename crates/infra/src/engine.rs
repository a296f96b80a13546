//! Job execution engine: drives one job through its lifecycle per delivery.
//!
//! ## Protocol
//!
//! 1. Fetch the job. Missing row ⇒ data error.
//! 2. Idempotency guard: anything but `PENDING` is a duplicate delivery and
//!    is acknowledged without touching the row.
//! 3. Claim: persist `RUNNING` before any analysis work.
//! 4. Resolve the file reference against the file root.
//! 5. Dispatch to the strategy registered for the job's analysis type.
//! 6. Finalize: `COMPLETED` with the strategy output, or `FAILED` with the cause.
//!
//! ## Classification
//!
//! Failures of the input (bad file, unknown type, strategy data-quality
//! errors, a panicking strategy) are recorded on the job and reported as
//! [`JobOutcome::Failed`]: the delivery succeeded. Only [`ProcessError`]s reach the transport, and
//! their [`ErrorClass`] decides between dead-lettering and redelivery.
//! A store failure at any write leaves the row at its last committed state.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use idh_analysis::{AnalysisOutput, StrategyRegistry};
use idh_core::{DecodeError, ErrorClass, JobId, JobRecord, JobStatus, JobUpdate, TaskDescriptor};

use crate::jobs::{JobStore, StoreError};

/// What happened to the job. Every outcome acknowledges the delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Strategy succeeded; the job is `COMPLETED`.
    Completed { summary: String },
    /// Analysis error recorded; the job is `FAILED`.
    Failed { error: String },
    /// The job was not `PENDING`; nothing was written.
    Duplicate { status: JobStatus },
}

impl JobOutcome {
    /// Class of the failure behind this outcome, if any.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            JobOutcome::Failed { .. } => Some(ErrorClass::Analysis),
            JobOutcome::Completed { .. } | JobOutcome::Duplicate { .. } => None,
        }
    }
}

/// A delivery the engine could not bring to a recorded outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("invalid task payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("task for job {0} carries no file reference")]
    MissingFilePath(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProcessError::Decode(_)
            | ProcessError::JobNotFound(_)
            | ProcessError::MissingFilePath(_) => ErrorClass::Data,
            ProcessError::Store(_) => ErrorClass::Infrastructure,
        }
    }
}

/// Runs jobs against a store and a strategy registry.
#[derive(Debug)]
pub struct JobEngine<S> {
    store: S,
    registry: Arc<StrategyRegistry>,
    file_root: PathBuf,
}

impl<S> JobEngine<S>
where
    S: JobStore,
{
    pub fn new(store: S, registry: Arc<StrategyRegistry>, file_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            registry,
            file_root: file_root.into(),
        }
    }

    /// Process one decoded task descriptor.
    #[instrument(skip(self, task), fields(job_id = %task.job_id))]
    pub fn process(&self, task: &TaskDescriptor) -> Result<JobOutcome, ProcessError> {
        let job_id = task.job_id;

        let job = self
            .store
            .fetch(job_id)?
            .ok_or(ProcessError::JobNotFound(job_id))?;

        if job.status != JobStatus::Pending {
            if job.status.is_terminal() {
                info!(status = %job.status, "job already processed; skipping duplicate delivery");
            } else {
                // Claimed by an earlier delivery that never finished.
                warn!(status = %job.status, "job claimed but unfinished; skipping duplicate delivery");
            }
            return Ok(JobOutcome::Duplicate { status: job.status });
        }

        self.store.update(job_id, &JobUpdate::claim())?;
        info!(analysis_type = %job.analysis_type, "job claimed");

        let Some(file_path) = task.file_path.as_deref() else {
            let err = ProcessError::MissingFilePath(job_id);
            self.store.update(job_id, &JobUpdate::fail(err.to_string()))?;
            warn!(error = %err, "job failed: invalid task");
            return Err(err);
        };

        match self.analyse(&job, task, file_path) {
            Ok(output) => {
                self.store.update(
                    job_id,
                    &JobUpdate::complete(output.summary.clone(), output.details),
                )?;
                info!(summary = %output.summary, "job completed");
                Ok(JobOutcome::Completed {
                    summary: output.summary,
                })
            }
            Err(error) => {
                self.store.update(job_id, &JobUpdate::fail(error.clone()))?;
                warn!(error = %error, "job failed");
                Ok(JobOutcome::Failed { error })
            }
        }
    }

    /// Steps 4 and 5. The error is the analysis error to record.
    fn analyse(
        &self,
        job: &JobRecord,
        task: &TaskDescriptor,
        file_path: &str,
    ) -> Result<AnalysisOutput, String> {
        let input = resolve_file(&self.file_root, file_path)?;

        if let Some(requested) = task.analysis_type.as_deref() {
            if requested != job.analysis_type {
                warn!(
                    requested,
                    recorded = %job.analysis_type,
                    "task analysis type differs from job record; using job record"
                );
            }
        }

        let strategy = self
            .registry
            .resolve(&job.analysis_type)
            .map_err(|e| e.to_string())?;

        // A panic is recorded like any other analysis error.
        match panic::catch_unwind(AssertUnwindSafe(|| strategy.execute(&input))) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(payload) => Err(format!(
                "strategy panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

/// Join `relative` onto `root`, refusing anything that would leave `root`.
///
/// The error is the message recorded on the job.
pub fn resolve_file(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let mut clean = PathBuf::new();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                clean.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                clean.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("file path escapes file root: {relative}"));
            }
        }
    }

    let path = root.join(clean);
    if !path.exists() {
        return Err(format!("input file not found: {}", path.display()));
    }
    Ok(path)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
