//! # Batch Runner
//!
//! Executes exactly one batch of one migration. Shared by the paced
//! scheduler and the finalizer, which differ only in *when* they call it.
//!
//! ## Per-batch flow
//!
//! 1. A last job still `running` past the stale timeout is recorded as a
//!    failed attempt.
//! 2. A last job that failed below the attempt ceiling is retried over its
//!    exact range with `attempts + 1`; otherwise the migration's strategy
//!    computes the next range from the cursor.
//! 3. No range left: the migration is finished.
//! 4. A `running` job record is created (the store refuses a second one).
//! 5. The registered [`MigrationJob`](crate::registry::MigrationJob) runs. A
//!    panic counts as a failed attempt.
//! 6. Success moves the cursor to the range end; reaching `max_value`
//!    finishes the migration.
//! 7. Failure is recorded on the job; at the ceiling the migration fails.
//!
//! A migration that cannot run at all (unregistered job, unknown strategy,
//! invalid sizes) is marked failed instead of erroring on every pass.
//! Status changes re-read the stored status, so an operator pause issued
//! while a batch runs is kept.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::batching::{BatchBoundsStrategy, BatchContext, BatchRange, BatchingStrategy};
use crate::config::EngineConfig;
use crate::database::{MigrationStore, TableIntrospector};
use crate::error::{MigrationError, Result};
use crate::logging::{log_batch_operation, log_migration_operation};
use crate::models::{BatchedJob, BatchedMigration, JobCompletion, NewBatchedJob};
use crate::registry::{BatchArguments, JobRegistry};
use crate::state_machine::{determine_target_state, JobStatus, MigrationEvent};

/// Result of one [`BatchRunner::run_next_batch`] call
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The job succeeded; `migration_finished` when it covered `max_value`
    Succeeded {
        job: BatchedJob,
        migration_finished: bool,
    },
    /// The job failed and the range will be retried
    RetryScheduled { job: BatchedJob },
    /// The job failed at the attempt ceiling; the migration is now failed
    Failed { job: BatchedJob },
    /// No range was left; the migration is now finished
    Finished,
    /// The migration could not run at all and is now failed
    Aborted { error: String },
}

impl BatchOutcome {
    pub fn job(&self) -> Option<&BatchedJob> {
        match self {
            Self::Succeeded { job, .. } | Self::RetryScheduled { job } | Self::Failed { job } => {
                Some(job)
            }
            Self::Finished | Self::Aborted { .. } => None,
        }
    }

    /// True when the migration left the `active` status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded {
                migration_finished: true,
                ..
            } | Self::Failed { .. }
                | Self::Finished
                | Self::Aborted { .. }
        )
    }
}

pub struct BatchRunner {
    store: Arc<dyn MigrationStore>,
    introspector: Arc<dyn TableIntrospector>,
    jobs: Arc<JobRegistry>,
    max_batch_attempts: i32,
    stale_job_timeout: Duration,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        introspector: Arc<dyn TableIntrospector>,
        jobs: Arc<JobRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            introspector,
            jobs,
            max_batch_attempts: config.max_batch_attempts.max(1),
            stale_job_timeout: config.stale_job_timeout(),
        }
    }

    pub fn max_batch_attempts(&self) -> i32 {
        self.max_batch_attempts
    }

    /// How long a job may stay `running` before it is treated as abandoned
    pub fn stale_job_timeout(&self) -> Duration {
        self.stale_job_timeout
    }

    /// Start time after which `job` counts as abandoned; `None` once finished
    pub fn stale_after(&self, job: &BatchedJob) -> Option<DateTime<Utc>> {
        if job.status.is_terminal() {
            return None;
        }
        let started_at = job.started_at.unwrap_or(job.created_at);
        Some(
            started_at
                .checked_add_signed(to_chrono(self.stale_job_timeout))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Run the next batch of an active migration, ignoring pacing.
    ///
    /// Job failures are recorded and reported through the outcome. A
    /// migration that cannot run is failed and reported as
    /// [`BatchOutcome::Aborted`]. Only store errors are returned as `Err`.
    #[instrument(skip(self, migration), fields(migration_id = migration.id))]
    pub async fn run_next_batch(
        &self,
        migration: &BatchedMigration,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        match self.execute_batch(migration, now).await {
            Err(e) if e.is_configuration_error() => self.abort(migration, e).await,
            other => other,
        }
    }

    async fn execute_batch(
        &self,
        migration: &BatchedMigration,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let job = self.jobs.resolve(&migration.job_class_name)?;

        let last = match self.store.last_job(migration.id).await? {
            Some(last) if self.stale_after(&last).is_some_and(|at| at <= now) => {
                let abandoned = self.fail_stale_job(migration, last, now).await?;
                if abandoned.attempts >= self.max_batch_attempts {
                    let message = abandoned.error_message.clone().unwrap_or_default();
                    self.transition(migration, MigrationEvent::fail_with_error(message))
                        .await?;
                    return Ok(BatchOutcome::Failed { job: abandoned });
                }
                Some(abandoned)
            }
            last => last,
        };

        let Some((range, attempts)) = self.next_range(migration, last.as_ref()).await? else {
            self.transition(migration, MigrationEvent::Finish).await?;
            return Ok(BatchOutcome::Finished);
        };

        let running = self
            .store
            .create_job(NewBatchedJob {
                batched_migration_id: migration.id,
                min_value: range.start,
                max_value: range.end,
                batch_size: migration.batch_size,
                sub_batch_size: migration.sub_batch_size,
                attempts,
                started_at: now,
            })
            .await?;

        log_batch_operation(
            "start",
            migration.id,
            range.start,
            range.end,
            attempts,
            JobStatus::Running.as_str(),
            None,
        );

        let arguments = BatchArguments {
            start_key: range.start,
            end_key: range.end,
            table_name: migration.table_name.clone(),
            column_name: migration.column_name.clone(),
            sub_batch_size: migration.sub_batch_size,
            job_arguments: migration.job_arguments.clone(),
        };

        let result = match AssertUnwindSafe(job.perform(&arguments)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "batch job panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        let finished_at = Utc::now().max(now);

        match result {
            Ok(report) => {
                let completed = self
                    .store
                    .complete_job(
                        running.job_uuid,
                        JobCompletion::succeeded(finished_at, report.rows_processed),
                    )
                    .await?;
                self.store.advance_cursor(migration.id, range.end).await?;

                log_batch_operation(
                    "complete",
                    migration.id,
                    range.start,
                    range.end,
                    attempts,
                    JobStatus::Succeeded.as_str(),
                    None,
                );

                let migration_finished = range.end >= migration.max_value
                    && self.transition(migration, MigrationEvent::Finish).await?;

                Ok(BatchOutcome::Succeeded {
                    job: completed,
                    migration_finished,
                })
            }
            Err(e) => {
                let message = format!("{e:#}");
                let completed = self
                    .store
                    .complete_job(running.job_uuid, JobCompletion::failed(finished_at, &message))
                    .await?;

                log_batch_operation(
                    "complete",
                    migration.id,
                    range.start,
                    range.end,
                    attempts,
                    JobStatus::Failed.as_str(),
                    Some(&message),
                );

                if attempts >= self.max_batch_attempts {
                    error!(
                        migration_id = migration.id,
                        range = %range,
                        attempts = attempts,
                        error = %message,
                        "Batch exhausted its attempts, marking migration as failed"
                    );
                    self.transition(migration, MigrationEvent::fail_with_error(message))
                        .await?;
                    Ok(BatchOutcome::Failed { job: completed })
                } else {
                    warn!(
                        migration_id = migration.id,
                        range = %range,
                        attempts = attempts,
                        max_attempts = self.max_batch_attempts,
                        error = %message,
                        "Batch failed, will retry"
                    );
                    Ok(BatchOutcome::RetryScheduled { job: completed })
                }
            }
        }
    }

    /// Range and attempt number of the batch to run next
    async fn next_range(
        &self,
        migration: &BatchedMigration,
        last: Option<&BatchedJob>,
    ) -> Result<Option<(BatchRange, i32)>> {
        let mut previous_end = migration.cursor_value;

        if let Some(last) = last {
            match last.status {
                JobStatus::Failed if last.attempts < self.max_batch_attempts => {
                    return Ok(Some((
                        BatchRange::new(last.min_value, last.max_value),
                        last.attempts + 1,
                    )));
                }
                // the cursor write can be lost after the job was recorded
                JobStatus::Succeeded => {
                    previous_end = previous_end.max(Some(last.max_value));
                }
                _ => {}
            }
        }

        let strategy = BatchingStrategy::from_name(&migration.batch_class_name)?;
        let ctx = BatchContext {
            table_name: &migration.table_name,
            column_name: &migration.column_name,
            previous_end,
            batch_size: migration.batch_size,
            min_value: migration.min_value,
            max_value: migration.max_value,
            introspector: self.introspector.as_ref(),
        };

        Ok(strategy.next_range(&ctx).await?.map(|range| (range, 1)))
    }

    /// Record a job that outlived the stale timeout as a failed attempt
    async fn fail_stale_job(
        &self,
        migration: &BatchedMigration,
        job: BatchedJob,
        now: DateTime<Utc>,
    ) -> Result<BatchedJob> {
        let message = format!(
            "batch job abandoned: no result recorded within {}s",
            self.stale_job_timeout.as_secs()
        );
        warn!(
            migration_id = migration.id,
            job_uuid = %job.job_uuid,
            range = %BatchRange::new(job.min_value, job.max_value),
            attempts = job.attempts,
            "Stale running batch job, recording it as failed"
        );

        let failed = self
            .store
            .complete_job(job.job_uuid, JobCompletion::failed(now, &message))
            .await?;

        log_batch_operation(
            "abandon",
            migration.id,
            failed.min_value,
            failed.max_value,
            failed.attempts,
            JobStatus::Failed.as_str(),
            Some(&message),
        );
        Ok(failed)
    }

    async fn abort(&self, migration: &BatchedMigration, cause: MigrationError) -> Result<BatchOutcome> {
        let message = cause.to_string();
        error!(
            migration_id = migration.id,
            job_class_name = %migration.job_class_name,
            error = %message,
            "Batched migration cannot run, marking it as failed"
        );
        self.transition(migration, MigrationEvent::fail_with_error(message.clone()))
            .await?;
        Ok(BatchOutcome::Aborted { error: message })
    }

    /// Apply `event` to the stored status; `false` when an operator changed
    /// the status while the batch ran and the change was kept.
    async fn transition(&self, migration: &BatchedMigration, event: MigrationEvent) -> Result<bool> {
        let Some(current) = self.store.find_migration(migration.id).await? else {
            warn!(
                migration_id = migration.id,
                event = event.event_type(),
                "Batched migration was deleted while its batch ran"
            );
            return Ok(false);
        };

        if current.status != migration.status {
            warn!(
                migration_id = migration.id,
                event = event.event_type(),
                status = %current.status,
                "Batched migration status changed while its batch ran, keeping it"
            );
            return Ok(false);
        }

        let target = determine_target_state(migration.id, current.status, &event)?;
        self.store.update_status(migration.id, target).await?;

        log_migration_operation(
            event.event_type(),
            Some(migration.id),
            &migration.job_class_name,
            &migration.table_name,
            target.as_str(),
            event.error_message(),
        );

        if target.is_terminal() {
            info!(
                migration_id = migration.id,
                status = %target,
                "Batched migration reached a terminal status"
            );
        }
        Ok(true)
    }
}

/// `ConcurrentBatch` means another worker owns the migration right now
pub(crate) fn is_busy(error: &MigrationError) -> bool {
    matches!(error, MigrationError::ConcurrentBatch { .. })
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 1_000))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_reads_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(format!("row {} is locked", 7));
        assert_eq!(panic_message(payload.as_ref()), "row 7 is locked");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_aborted_outcome_is_terminal_without_job() {
        let outcome = BatchOutcome::Aborted {
            error: "Unknown background migration job 'Gone'".to_string(),
        };
        assert!(outcome.is_terminal());
        assert!(outcome.job().is_none());
    }
}
