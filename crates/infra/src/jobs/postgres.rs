//! Postgres-backed job store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Io / Tls / PoolTimedOut / PoolClosed | `Unavailable` |
//! | column decode failure, unknown status string | `Corrupt` |
//! | undecodable `id` in a listing | `Storage` |
//! | anything else | `Storage` |
//!
//! Every variant is an infrastructure failure from the engine's point of view.
//!
//! ## Runtime
//!
//! [`JobStore`] is synchronous. The store owns a current-thread tokio runtime
//! and blocks on it, so it must not be called from inside another runtime.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::runtime::Runtime;
use tracing::instrument;

use idh_core::{DataSourceId, JobId, JobRecord, JobStatus, JobUpdate};

use super::store::{JobStore, StoreError};

const COLUMNS: &str = "id, data_source_id, analysis_type, status, result_summary, error_message, \
                       result_details_json, created_at, updated_at";

/// Job store over the `analysis_results` table.
#[derive(Debug)]
pub struct PostgresJobStore {
    pool: PgPool,
    runtime: Runtime,
}

impl PostgresJobStore {
    /// Build the runtime and pool. Connections are opened lazily, so use
    /// [`JobStore::ping`] to verify connectivity.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to start runtime: {e}")))?;

        let pool = {
            let _guard = runtime.enter();
            PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .connect_lazy(database_url)
                .map_err(|e| map_sqlx_error("connect", e))?
        };

        Ok(Self { pool, runtime })
    }

    async fn fetch_async(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM analysis_results WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;

        row.map(|r| record_from_row(id, &r)).transpose()
    }

    /// `expected`, when set, guards the write on the current status.
    /// `Ok(None)` when no row matched.
    async fn update_async(
        &self,
        id: JobId,
        expected: Option<JobStatus>,
        update: &JobUpdate,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE analysis_results SET
                status = COALESCE($2, status),
                result_summary = COALESCE($3, result_summary),
                error_message = COALESCE($4, error_message),
                result_details_json = COALESCE($5::json, result_details_json),
                updated_at = NOW()
            WHERE id = $1 AND ($6::text IS NULL OR status = $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.result_summary.as_deref())
        .bind(update.error_message.as_deref())
        .bind(update.result_details.as_ref())
        .bind(expected.map(|s| s.as_str()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        // Dropping `tx` without commit rolls back.
        let Some(row) = row else {
            return Ok(None);
        };
        let record = record_from_row(id, &row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Some(record))
    }

    async fn find_stale_running_async(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM analysis_results WHERE status = $1 AND updated_at < $2 ORDER BY id"
        ))
        .bind(JobStatus::Running.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stale_running", e))?;

        rows.iter()
            .map(|row| {
                let id = listed_id(row.try_get::<i64, _>("id"))?;
                record_from_row(id, row)
            })
            .collect()
    }
}

impl JobStore for PostgresJobStore {
    #[instrument(skip(self), fields(job_id = %id), err)]
    fn fetch(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.runtime.block_on(self.fetch_async(id))
    }

    #[instrument(skip(self, update), fields(job_id = %id, status = ?update.status), err)]
    fn update(&self, id: JobId, update: &JobUpdate) -> Result<JobRecord, StoreError> {
        self.runtime
            .block_on(self.update_async(id, None, update))?
            .ok_or(StoreError::NotFound(id))
    }

    #[instrument(skip(self, update), fields(job_id = %id, %expected, status = ?update.status), err)]
    fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: &JobUpdate,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.runtime.block_on(self.update_async(id, Some(expected), update))
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| map_sqlx_error("ping", e))
        })
    }

    fn find_stale_running(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        self.runtime.block_on(self.find_stale_running_async(cutoff))
    }
}

/// Rows of a listing carry no known id, so a bad one cannot be `Corrupt`.
fn listed_id(raw: Result<i64, sqlx::Error>) -> Result<JobId, StoreError> {
    raw.map(JobId::new)
        .map_err(|e| StoreError::Storage(format!("unreadable job id in listing: {e}")))
}

fn record_from_row(id: JobId, row: &PgRow) -> Result<JobRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };
    let column = |e: sqlx::Error| corrupt(e.to_string());

    let status: String = row.try_get("status").map_err(column)?;
    let status: JobStatus = status.parse().map_err(|e: idh_core::ParseStatusError| corrupt(e.to_string()))?;

    Ok(JobRecord {
        id: JobId::new(row.try_get("id").map_err(column)?),
        data_source_id: DataSourceId::new(row.try_get("data_source_id").map_err(column)?),
        analysis_type: row.try_get("analysis_type").map_err(column)?,
        status,
        result_summary: row.try_get("result_summary").map_err(column)?,
        error_message: row.try_get("error_message").map_err(column)?,
        result_details: row
            .try_get::<Option<JsonValue>, _>("result_details_json")
            .map_err(column)?,
        created_at: timestamp(row, "created_at").map_err(column)?,
        updated_at: timestamp(row, "updated_at").map_err(column)?,
    })
}

/// Accept both `TIMESTAMP` (taken as UTC) and `TIMESTAMPTZ` columns.
fn timestamp(row: &PgRow, name: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    match row.try_get::<DateTime<Utc>, _>(name) {
        Ok(ts) => Ok(ts),
        Err(_) => row
            .try_get::<NaiveDateTime, _>(name)
            .map(|naive| naive.and_utc()),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_listing_id_is_an_error_not_job_zero() {
        let err = listed_id(Err(sqlx::Error::ColumnNotFound("id".to_string()))).unwrap_err();
        assert!(matches!(err, StoreError::Storage(ref m) if m.contains("unreadable job id")));
        assert_eq!(listed_id(Ok(7)), Ok(JobId::new(7)));
    }

    #[test]
    fn pool_exhaustion_is_unavailable() {
        assert!(matches!(
            map_sqlx_error("fetch", sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error("fetch", sqlx::Error::RowNotFound),
            StoreError::Storage(_)
        ));
    }
}
