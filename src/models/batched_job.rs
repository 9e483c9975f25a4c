//! # Batched Job Model
//!
//! One executed (or attempted) batch of a batched migration. Records are
//! append-only: a retry of the same key range creates a new record with
//! `attempts` incremented, and a record is never touched again once it has
//! reached `succeeded` or `failed`.
//!
//! ## Database Schema
//!
//! Maps to `batched_background_migration_jobs`:
//! ```sql
//! CREATE TABLE batched_background_migration_jobs (
//!   id BIGSERIAL PRIMARY KEY,
//!   job_uuid UUID NOT NULL UNIQUE,
//!   batched_migration_id BIGINT NOT NULL REFERENCES batched_background_migrations (id) ON DELETE CASCADE,
//!   min_value BIGINT NOT NULL,
//!   max_value BIGINT NOT NULL,
//!   batch_size BIGINT NOT NULL,
//!   sub_batch_size BIGINT NOT NULL,
//!   status TEXT NOT NULL,
//!   attempts INTEGER NOT NULL,
//!   started_at TIMESTAMPTZ,
//!   finished_at TIMESTAMPTZ,
//!   rows_processed BIGINT,
//!   error_message TEXT,
//!   created_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! A partial unique index on `batched_migration_id WHERE status = 'running'`
//! guarantees at most one in-flight batch per migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{MigrationError, Result};
use crate::state_machine::JobStatus;

const JOB_COLUMNS: &str = r#"
    id, job_uuid, batched_migration_id, min_value, max_value, batch_size, sub_batch_size,
    status, attempts, started_at, finished_at, rows_processed, error_message, created_at
"#;

/// Name of the partial unique index that allows one running job per migration
const ONE_RUNNING_JOB_INDEX: &str = "index_batched_jobs_one_running_per_migration";

/// A single batch attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedJob {
    pub id: i64,
    pub job_uuid: Uuid,
    pub batched_migration_id: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub batch_size: i64,
    pub sub_batch_size: i64,
    pub status: JobStatus,
    pub attempts: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_processed: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New job for creation; jobs are created already running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBatchedJob {
    pub batched_migration_id: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub batch_size: i64,
    pub sub_batch_size: i64,
    pub attempts: i32,
    pub started_at: DateTime<Utc>,
}

/// Terminal outcome written back to a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub finished_at: DateTime<Utc>,
    pub rows_processed: Option<i64>,
    pub error_message: Option<String>,
}

impl JobCompletion {
    pub fn succeeded(finished_at: DateTime<Utc>, rows_processed: Option<i64>) -> Self {
        Self {
            status: JobStatus::Succeeded,
            finished_at,
            rows_processed,
            error_message: None,
        }
    }

    pub fn failed(finished_at: DateTime<Utc>, error_message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            finished_at,
            rows_processed: None,
            error_message: Some(error_message.into()),
        }
    }
}

#[derive(Debug, FromRow)]
struct BatchedJobRow {
    id: i64,
    job_uuid: Uuid,
    batched_migration_id: i64,
    min_value: i64,
    max_value: i64,
    batch_size: i64,
    sub_batch_size: i64,
    status: String,
    attempts: i32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    rows_processed: Option<i64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BatchedJobRow> for BatchedJob {
    type Error = MigrationError;

    fn try_from(row: BatchedJobRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            job_uuid: row.job_uuid,
            batched_migration_id: row.batched_migration_id,
            min_value: row.min_value,
            max_value: row.max_value,
            batch_size: row.batch_size,
            sub_batch_size: row.sub_batch_size,
            status: row.status.parse().map_err(MigrationError::Database)?,
            attempts: row.attempts,
            started_at: row.started_at,
            finished_at: row.finished_at,
            rows_processed: row.rows_processed,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

impl BatchedJob {
    /// Generate a job UUID for correlation in logs
    pub fn generate_job_uuid() -> Uuid {
        Uuid::new_v4()
    }

    /// Wall-clock duration of a finished job
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some(finished - started),
            _ => None,
        }
    }

    /// Create a running job
    ///
    /// Fails with [`MigrationError::ConcurrentBatch`] when the migration
    /// already has a running job.
    pub async fn create(pool: &PgPool, new_job: NewBatchedJob) -> Result<Self> {
        let query = format!(
            r#"
            INSERT INTO batched_background_migration_jobs
            (job_uuid, batched_migration_id, min_value, max_value, batch_size, sub_batch_size,
             status, attempts, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'running', $7, $8)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, BatchedJobRow>(&query)
            .bind(Self::generate_job_uuid())
            .bind(new_job.batched_migration_id)
            .bind(new_job.min_value)
            .bind(new_job.max_value)
            .bind(new_job.batch_size)
            .bind(new_job.sub_batch_size)
            .bind(new_job.attempts)
            .bind(new_job.started_at)
            .fetch_one(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err)
                    if db_err.constraint() == Some(ONE_RUNNING_JOB_INDEX) =>
                {
                    MigrationError::ConcurrentBatch {
                        migration_id: new_job.batched_migration_id,
                    }
                }
                _ => MigrationError::from(e),
            })?;

        Self::try_from(row)
    }

    /// Write the terminal outcome of a running job
    pub async fn complete(pool: &PgPool, job_uuid: Uuid, completion: JobCompletion) -> Result<Self> {
        let query = format!(
            r#"
            UPDATE batched_background_migration_jobs
            SET status = $2, finished_at = $3, rows_processed = $4, error_message = $5
            WHERE job_uuid = $1 AND status = 'running'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, BatchedJobRow>(&query)
            .bind(job_uuid)
            .bind(completion.status.as_str())
            .bind(completion.finished_at)
            .bind(completion.rows_processed)
            .bind(&completion.error_message)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| {
                MigrationError::Database(format!("Job {job_uuid} is not running and cannot be completed"))
            })?;

        Self::try_from(row)
    }

    /// Most recently created job of a migration
    pub async fn find_last_for_migration(pool: &PgPool, migration_id: i64) -> Result<Option<Self>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM batched_background_migration_jobs
            WHERE batched_migration_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#
        );

        sqlx::query_as::<_, BatchedJobRow>(&query)
            .bind(migration_id)
            .fetch_optional(pool)
            .await?
            .map(Self::try_from)
            .transpose()
    }

    /// Every job of a migration in creation order
    pub async fn find_by_migration(pool: &PgPool, migration_id: i64) -> Result<Vec<Self>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM batched_background_migration_jobs
            WHERE batched_migration_id = $1
            ORDER BY id ASC
            "#
        );

        sqlx::query_as::<_, BatchedJobRow>(&query)
            .bind(migration_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Self::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_constructors() {
        let now = Utc::now();

        let ok = JobCompletion::succeeded(now, Some(1_000));
        assert_eq!(ok.status, JobStatus::Succeeded);
        assert_eq!(ok.rows_processed, Some(1_000));
        assert!(ok.error_message.is_none());

        let failed = JobCompletion::failed(now, "deadlock detected");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("deadlock detected"));
    }

    #[test]
    fn test_duration_requires_both_timestamps() {
        let started = Utc::now();
        let mut job = BatchedJob {
            id: 1,
            job_uuid: BatchedJob::generate_job_uuid(),
            batched_migration_id: 1,
            min_value: 1,
            max_value: 1_000,
            batch_size: 1_000,
            sub_batch_size: 100,
            status: JobStatus::Running,
            attempts: 1,
            started_at: Some(started),
            finished_at: None,
            rows_processed: None,
            error_message: None,
            created_at: started,
        };
        assert!(job.duration().is_none());

        job.finished_at = Some(started + chrono::Duration::seconds(3));
        assert_eq!(job.duration(), Some(chrono::Duration::seconds(3)));
    }

    #[test]
    fn test_job_serialization() {
        let now = Utc::now();
        let job = BatchedJob {
            id: 4,
            job_uuid: BatchedJob::generate_job_uuid(),
            batched_migration_id: 2,
            min_value: 1_001,
            max_value: 2_000,
            batch_size: 1_000,
            sub_batch_size: 100,
            status: JobStatus::Failed,
            attempts: 2,
            started_at: Some(now),
            finished_at: Some(now),
            rows_processed: None,
            error_message: Some("boom".to_string()),
            created_at: now,
        };

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["attempts"], 2);
    }
}
