//! # Migration Registry
//!
//! Creates, looks up and administers batched migration definitions.
//!
//! Enqueueing is idempotent on the identity key: a second enqueue with the
//! same (job class, table, column, job arguments) logs a warning and returns
//! the existing definition untouched. Everything that could make a definition
//! unrunnable (unregistered job, unknown strategy, argument count, batch
//! sizes) is rejected here, before anything is persisted.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::MigrationContext;
use crate::batching::{BatchBoundsStrategy, BatchingStrategy};
use crate::config::EngineConfig;
use crate::constants::strategies;
use crate::database::{MigrationStore, TableIntrospector};
use crate::error::{MigrationError, Result};
use crate::logging::log_migration_operation;
use crate::models::{BatchedMigration, MigrationIdentity, NewBatchedMigration};
use crate::registry::JobRegistry;
use crate::state_machine::{determine_target_state, MigrationEvent, MigrationStatus};

/// Parameters of a new batched migration.
///
/// Everything except the identity and interval is optional and falls back to
/// the engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
    pub job_class_name: String,
    pub table_name: String,
    pub column_name: String,
    pub job_arguments: Vec<Value>,
    pub interval: Duration,
    pub min_value: Option<i64>,
    /// Upper bound; `MAX(column)` of the table when absent
    pub max_value: Option<i64>,
    pub batch_class_name: Option<String>,
    pub batch_size: Option<i64>,
    pub sub_batch_size: Option<i64>,
    pub max_batch_size: Option<i64>,
    pub schema_tag: Option<String>,
    pub queued_migration_version: Option<String>,
}

impl EnqueueRequest {
    pub fn new(
        job_class_name: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            job_class_name: job_class_name.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
            job_arguments: Vec::new(),
            interval,
            min_value: None,
            max_value: None,
            batch_class_name: None,
            batch_size: None,
            sub_batch_size: None,
            max_batch_size: None,
            schema_tag: None,
            queued_migration_version: None,
        }
    }

    pub fn with_job_arguments(mut self, job_arguments: Vec<Value>) -> Self {
        self.job_arguments = job_arguments;
        self
    }

    pub fn with_min_value(mut self, min_value: i64) -> Self {
        self.min_value = Some(min_value);
        self
    }

    pub fn with_max_value(mut self, max_value: i64) -> Self {
        self.max_value = Some(max_value);
        self
    }

    pub fn with_batch_class_name(mut self, batch_class_name: impl Into<String>) -> Self {
        self.batch_class_name = Some(batch_class_name.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_sub_batch_size(mut self, sub_batch_size: i64) -> Self {
        self.sub_batch_size = Some(sub_batch_size);
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: i64) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }

    pub fn with_schema_tag(mut self, schema_tag: impl Into<String>) -> Self {
        self.schema_tag = Some(schema_tag.into());
        self
    }

    pub fn with_queued_migration_version(mut self, version: impl Into<String>) -> Self {
        self.queued_migration_version = Some(version.into());
        self
    }

    pub fn identity(&self) -> MigrationIdentity {
        MigrationIdentity::new(
            self.job_class_name.clone(),
            self.table_name.clone(),
            self.column_name.clone(),
            self.job_arguments.clone(),
        )
    }
}

/// Check the batch size invariants shared by enqueue and live resizing
pub fn validate_batch_sizes(
    batch_size: i64,
    sub_batch_size: i64,
    max_batch_size: Option<i64>,
) -> Result<()> {
    if batch_size < 1 {
        return Err(MigrationError::InvalidBatchSettings(format!(
            "batch_size must be at least 1, got {batch_size}"
        )));
    }
    if sub_batch_size < 1 {
        return Err(MigrationError::InvalidBatchSettings(format!(
            "sub_batch_size must be at least 1, got {sub_batch_size}"
        )));
    }
    if sub_batch_size > batch_size {
        return Err(MigrationError::InvalidBatchSettings(format!(
            "sub_batch_size ({sub_batch_size}) must not exceed batch_size ({batch_size})"
        )));
    }
    if let Some(max_batch_size) = max_batch_size {
        if batch_size > max_batch_size {
            return Err(MigrationError::InvalidBatchSettings(format!(
                "batch_size ({batch_size}) must not exceed max_batch_size ({max_batch_size})"
            )));
        }
    }
    Ok(())
}

/// Enqueue, lookup and operator actions on migration definitions
pub struct MigrationRegistry {
    store: Arc<dyn MigrationStore>,
    introspector: Arc<dyn TableIntrospector>,
    jobs: Arc<JobRegistry>,
    config: EngineConfig,
}

impl MigrationRegistry {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        introspector: Arc<dyn TableIntrospector>,
        jobs: Arc<JobRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            introspector,
            jobs,
            config,
        }
    }

    /// Create a batched migration, or return the existing one with the same
    /// identity.
    #[instrument(skip(self, ctx, request), fields(
        job_class_name = %request.job_class_name,
        table_name = %request.table_name,
        column_name = %request.column_name
    ))]
    pub async fn enqueue(
        &self,
        ctx: &MigrationContext,
        request: EnqueueRequest,
    ) -> Result<BatchedMigration> {
        let identity = request.identity();

        if let Some(existing) = self.store.find_migration_by_identity(&identity).await? {
            warn!(
                migration_id = existing.id,
                identity = %identity,
                "Batched background migration not enqueued because it already exists"
            );
            return Ok(existing);
        }

        self.jobs
            .validate_arguments(&request.job_class_name, &request.job_arguments)?;

        let batch_class_name = request
            .batch_class_name
            .clone()
            .unwrap_or_else(|| strategies::DEFAULT.to_string());
        let strategy = BatchingStrategy::from_name(&batch_class_name)?;

        let batch_size = request.batch_size.unwrap_or(self.config.default_batch_size);
        let sub_batch_size = request
            .sub_batch_size
            .unwrap_or(self.config.default_sub_batch_size);
        validate_batch_sizes(batch_size, sub_batch_size, request.max_batch_size)?;

        let interval = self.clamp_interval(request.interval);
        let interval_seconds = i64::try_from(interval.as_secs()).map_err(|_| {
            MigrationError::InvalidBatchSettings(format!(
                "interval of {}s is out of range",
                interval.as_secs()
            ))
        })?;
        let min_value = request.min_value.unwrap_or(self.config.default_min_value);

        let (max_value, status) = match request.max_value {
            Some(max_value) => (max_value, MigrationStatus::Active),
            None => match self
                .introspector
                .max_value(&request.table_name, &request.column_name)
                .await?
            {
                Some(max_value) => (max_value, MigrationStatus::Active),
                None => {
                    info!(
                        table_name = %request.table_name,
                        "Table is empty, creating batched migration as finished"
                    );
                    (min_value, MigrationStatus::Finished)
                }
            },
        };

        if min_value > max_value {
            return Err(MigrationError::InvalidBatchSettings(format!(
                "min_value ({min_value}) must not exceed max_value ({max_value})"
            )));
        }

        let total_tuple_count = match self
            .introspector
            .cardinality_estimate(&request.table_name)
            .await
        {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(
                    table_name = %request.table_name,
                    error = %e,
                    "Could not estimate table cardinality"
                );
                None
            }
        };

        let new_migration = NewBatchedMigration {
            job_class_name: request.job_class_name,
            table_name: request.table_name,
            column_name: request.column_name,
            job_arguments: request.job_arguments,
            schema_tag: request
                .schema_tag
                .unwrap_or_else(|| ctx.schema_tag().to_string()),
            queued_migration_version: request
                .queued_migration_version
                .or_else(|| ctx.queued_migration_version().map(str::to_string)),
            batch_class_name: strategy.name().to_string(),
            min_value,
            max_value,
            status,
            batch_size,
            sub_batch_size,
            max_batch_size: request.max_batch_size,
            interval_seconds,
            total_tuple_count,
        };

        let migration = match self.store.insert_migration(new_migration).await? {
            Some(migration) => migration,
            // Lost a race against a concurrent enqueue of the same identity
            None => self
                .store
                .find_migration_by_identity(&identity)
                .await?
                .ok_or_else(|| MigrationError::MigrationNotFound {
                    identity: identity.clone(),
                })?,
        };

        log_migration_operation(
            "enqueue",
            Some(migration.id),
            &migration.job_class_name,
            &migration.table_name,
            migration.status.as_str(),
            None,
        );

        Ok(migration)
    }

    /// Remove a definition and its jobs; `false` when none matched
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn delete(&self, identity: &MigrationIdentity) -> Result<bool> {
        let deleted = self.store.delete_migration(identity).await?;
        if deleted {
            log_migration_operation(
                "delete",
                None,
                &identity.job_class_name,
                &identity.table_name,
                "deleted",
                None,
            );
        }
        Ok(deleted)
    }

    pub async fn find(&self, identity: &MigrationIdentity) -> Result<Option<BatchedMigration>> {
        self.store.find_migration_by_identity(identity).await
    }

    /// Stop scheduling a migration; an in-flight batch is left to finish
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn pause(&self, identity: &MigrationIdentity) -> Result<BatchedMigration> {
        self.transition(identity, MigrationEvent::Pause).await
    }

    /// Return a paused or failed migration to scheduling
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn resume(&self, identity: &MigrationIdentity) -> Result<BatchedMigration> {
        self.transition(identity, MigrationEvent::Resume).await
    }

    /// Change batch sizes of a live migration; applies from the next batch
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn update_batch_sizes(
        &self,
        identity: &MigrationIdentity,
        batch_size: i64,
        sub_batch_size: i64,
    ) -> Result<BatchedMigration> {
        let mut migration = self.require(identity).await?;
        validate_batch_sizes(batch_size, sub_batch_size, migration.max_batch_size)?;

        self.store
            .update_batch_sizes(migration.id, batch_size, sub_batch_size)
            .await?;

        info!(
            migration_id = migration.id,
            old_batch_size = migration.batch_size,
            batch_size = batch_size,
            sub_batch_size = sub_batch_size,
            "Updated batch sizes"
        );

        migration.batch_size = batch_size;
        migration.sub_batch_size = sub_batch_size;
        Ok(migration)
    }

    async fn transition(
        &self,
        identity: &MigrationIdentity,
        event: MigrationEvent,
    ) -> Result<BatchedMigration> {
        let mut migration = self.require(identity).await?;
        let target = determine_target_state(migration.id, migration.status, &event)?;

        if target != migration.status {
            self.store.update_status(migration.id, target).await?;
            log_migration_operation(
                event.event_type(),
                Some(migration.id),
                &migration.job_class_name,
                &migration.table_name,
                target.as_str(),
                Some(&format!("from {}", migration.status)),
            );
            migration.status = target;
        }

        Ok(migration)
    }

    async fn require(&self, identity: &MigrationIdentity) -> Result<BatchedMigration> {
        self.store
            .find_migration_by_identity(identity)
            .await?
            .ok_or_else(|| MigrationError::MigrationNotFound {
                identity: identity.clone(),
            })
    }

    fn clamp_interval(&self, interval: Duration) -> Duration {
        let floor = self.config.minimum_interval();
        if interval < floor {
            warn!(
                requested_seconds = interval.as_secs(),
                minimum_seconds = floor.as_secs(),
                "Batched migration interval raised to the minimum"
            );
            return floor;
        }
        interval
    }
}
