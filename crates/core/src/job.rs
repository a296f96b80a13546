//! Persisted analysis job record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{DataSourceId, JobId};

/// Job lifecycle status.
///
/// `PENDING → RUNNING → {COMPLETED | FAILED}`. `PENDING` is assigned by the
/// producer that creates the row; the two terminal states are never left.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, waiting for a worker
    Pending,
    /// Claimed by a worker; analysis in progress (or interrupted)
    Running,
    /// Analysis finished; summary and details recorded
    Completed,
    /// Analysis failed; error message recorded
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// The value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored status string that is not one of the four known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}")]
pub struct ParseStatusError(pub String);

impl core::str::FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// In-memory view of one `analysis_results` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub data_source_id: DataSourceId,
    /// Key into the strategy registry (immutable once created).
    pub analysis_type: String,
    pub status: JobStatus,
    /// Set only on `COMPLETED`.
    pub result_summary: Option<String>,
    /// Set only on `FAILED`.
    pub error_message: Option<String>,
    /// Full structured result, set only on `COMPLETED`.
    pub result_details: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly created job, as the producer would insert it.
    pub fn pending(
        id: JobId,
        data_source_id: DataSourceId,
        analysis_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            data_source_id,
            analysis_type: analysis_type.into(),
            status: JobStatus::Pending,
            result_summary: None,
            error_message: None,
            result_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, refreshing `updated_at`.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(summary) = &update.result_summary {
            self.result_summary = Some(summary.clone());
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }
        if let Some(details) = &update.result_details {
            self.result_details = Some(details.clone());
        }
        self.updated_at = now;
    }
}

/// Partial field set applied to a job row in one transaction.
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
    pub result_details: Option<JsonValue>,
}

impl JobUpdate {
    /// `PENDING → RUNNING`, persisted before any analysis work starts.
    pub fn claim() -> Self {
        Self {
            status: Some(JobStatus::Running),
            ..Default::default()
        }
    }

    /// `RUNNING → COMPLETED` with the strategy's output.
    pub fn complete(summary: impl Into<String>, details: JsonValue) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result_summary: Some(summary.into()),
            result_details: Some(details),
            ..Default::default()
        }
    }

    /// `→ FAILED` with a human-readable cause.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.result_summary.is_none()
            && self.error_message.is_none()
            && self.result_details.is_none()
    }
}
