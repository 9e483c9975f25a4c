//! # Batch Scheduler
//!
//! Paced execution of active migrations, driven by an external trigger (a
//! cron-like loop calling [`BatchScheduler::tick`]). The scheduler never
//! spawns work of its own; every call runs at most one batch per migration
//! and awaits it.
//!
//! A migration is due when its `interval` has elapsed since its last job
//! started (or since it was created, before the first job). After a failed
//! attempt the wait grows to the configured retry backoff. A migration with a
//! running job is not due until that job outlives the stale job timeout.
//!
//! One migration's trouble never stalls the others: a migration that cannot
//! run is failed, and a store error on one migration is logged while the
//! pass moves on to the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::batch_runner::{is_busy, to_chrono, BatchOutcome, BatchRunner};
use crate::batching::BatchRange;
use crate::config::{BackoffConfig, MigrationsConfig};
use crate::database::MigrationStore;
use crate::error::Result;
use crate::models::BatchedMigration;
use crate::state_machine::JobStatus;

/// What a scheduler pass did for one migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Nothing was due
    Idle,
    BatchSucceeded {
        migration_id: i64,
        range: BatchRange,
    },
    Finished {
        migration_id: i64,
    },
    RetryScheduled {
        migration_id: i64,
        range: BatchRange,
        attempts: i32,
    },
    Failed {
        migration_id: i64,
        range: BatchRange,
    },
    /// The migration could not run and was marked failed
    Aborted {
        migration_id: i64,
        error: String,
    },
    /// Another worker holds the running job of this migration
    Busy {
        migration_id: i64,
    },
}

impl TickOutcome {
    pub fn migration_id(&self) -> Option<i64> {
        match self {
            Self::Idle => None,
            Self::BatchSucceeded { migration_id, .. }
            | Self::Finished { migration_id }
            | Self::RetryScheduled { migration_id, .. }
            | Self::Failed { migration_id, .. }
            | Self::Aborted { migration_id, .. }
            | Self::Busy { migration_id } => Some(*migration_id),
        }
    }

    fn from_batch(migration_id: i64, outcome: BatchOutcome) -> Self {
        match outcome {
            BatchOutcome::Finished
            | BatchOutcome::Succeeded {
                migration_finished: true,
                ..
            } => Self::Finished { migration_id },
            BatchOutcome::Succeeded { job, .. } => Self::BatchSucceeded {
                migration_id,
                range: BatchRange::new(job.min_value, job.max_value),
            },
            BatchOutcome::RetryScheduled { job } => Self::RetryScheduled {
                migration_id,
                range: BatchRange::new(job.min_value, job.max_value),
                attempts: job.attempts,
            },
            BatchOutcome::Failed { job } => Self::Failed {
                migration_id,
                range: BatchRange::new(job.min_value, job.max_value),
            },
            BatchOutcome::Aborted { error } => Self::Aborted {
                migration_id,
                error,
            },
        }
    }
}

pub struct BatchScheduler {
    store: Arc<dyn MigrationStore>,
    runner: Arc<BatchRunner>,
    backoff: BackoffConfig,
    schema_tag: Option<String>,
}

impl BatchScheduler {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        runner: Arc<BatchRunner>,
        config: &MigrationsConfig,
    ) -> Self {
        Self {
            store,
            runner,
            backoff: config.backoff.clone(),
            schema_tag: config.engine.schema_tag.clone(),
        }
    }

    /// Restrict scheduling to migrations of one schema tag
    pub fn with_schema_tag(mut self, schema_tag: impl Into<String>) -> Self {
        self.schema_tag = Some(schema_tag.into());
        self
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    pub async fn run_due(&self) -> Result<Vec<TickOutcome>> {
        self.run_due_at(Utc::now()).await
    }

    /// Run one batch of the first due migration (in id order).
    ///
    /// A migration whose pass errors is skipped in favour of the next due
    /// one; the error is returned only when no migration ran.
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let mut first_error = None;
        for migration in self.active_migrations().await? {
            let outcome = match self.is_due(&migration, now).await {
                Ok(false) => continue,
                Ok(true) => self.execute(&migration, now).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    error!(
                        migration_id = migration.id,
                        error = %e,
                        "Batched migration pass failed, retrying on the next cycle"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        debug!("No batched migration is due");
        Ok(TickOutcome::Idle)
    }

    /// Run one batch of every due migration.
    ///
    /// Only listing the active migrations can fail the whole pass; a store
    /// error on one migration is logged and the pass continues.
    #[instrument(skip(self))]
    pub async fn run_due_at(&self, now: DateTime<Utc>) -> Result<Vec<TickOutcome>> {
        let mut outcomes = Vec::new();
        for migration in self.active_migrations().await? {
            let outcome = match self.is_due(&migration, now).await {
                Ok(false) => continue,
                Ok(true) => self.execute(&migration, now).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(
                    migration_id = migration.id,
                    error = %e,
                    "Batched migration pass failed, retrying on the next cycle"
                ),
            }
        }
        Ok(outcomes)
    }

    /// Earliest time the next batch may start.
    ///
    /// With a job still running this is the moment that job turns stale.
    pub async fn next_run_at(&self, migration: &BatchedMigration) -> Result<Option<DateTime<Utc>>> {
        let interval = migration.interval();

        let Some(last) = self.store.last_job(migration.id).await? else {
            return Ok(Some(after(migration.created_at, interval)));
        };

        let wait = match last.status {
            JobStatus::Running | JobStatus::Pending => return Ok(self.runner.stale_after(&last)),
            JobStatus::Failed => self.backoff.retry_delay(interval, last.attempts),
            JobStatus::Succeeded => interval,
        };

        let started_at = last.started_at.unwrap_or(last.created_at);
        Ok(Some(after(started_at, wait)))
    }

    pub async fn is_due(&self, migration: &BatchedMigration, now: DateTime<Utc>) -> Result<bool> {
        if !migration.status.is_schedulable() {
            return Ok(false);
        }
        Ok(self
            .next_run_at(migration)
            .await?
            .is_some_and(|next_run_at| next_run_at <= now))
    }

    async fn active_migrations(&self) -> Result<Vec<BatchedMigration>> {
        self.store
            .list_active_migrations(self.schema_tag.as_deref())
            .await
    }

    async fn execute(&self, migration: &BatchedMigration, now: DateTime<Utc>) -> Result<TickOutcome> {
        match self.runner.run_next_batch(migration, now).await {
            Ok(outcome) => Ok(TickOutcome::from_batch(migration.id, outcome)),
            Err(e) if is_busy(&e) => {
                debug!(migration_id = migration.id, "Batched migration already has a running job");
                Ok(TickOutcome::Busy {
                    migration_id: migration.id,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn after(start: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    start
        .checked_add_signed(to_chrono(wait))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_chrono_keeps_millisecond_precision() {
        assert_eq!(
            to_chrono(Duration::from_millis(120_500)),
            chrono::Duration::milliseconds(120_500)
        );
    }

    #[test]
    fn test_after_saturates_instead_of_overflowing() {
        let start = Utc::now();
        assert_eq!(
            after(start, Duration::from_secs(120)),
            start + chrono::Duration::seconds(120)
        );
        assert_eq!(
            after(start, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_tick_outcome_migration_id() {
        assert_eq!(TickOutcome::Idle.migration_id(), None);
        assert_eq!(TickOutcome::Busy { migration_id: 4 }.migration_id(), Some(4));
        assert_eq!(
            TickOutcome::Aborted {
                migration_id: 6,
                error: "Unknown background migration job 'Gone'".to_string()
            }
            .migration_id(),
            Some(6)
        );
        assert_eq!(
            TickOutcome::BatchSucceeded {
                migration_id: 2,
                range: BatchRange::new(1, 10)
            }
            .migration_id(),
            Some(2)
        );
    }
}
