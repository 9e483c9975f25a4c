//! # In-Memory Store
//!
//! Process-local implementations of [`MigrationStore`] and
//! [`TableIntrospector`]. They honour the same invariants as the Postgres
//! store (identity uniqueness, one running job per migration, monotonic
//! cursor) and are what the engine's tests run against.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{MigrationStore, TableIntrospector};
use crate::error::{MigrationError, Result};
use crate::models::{
    BatchedJob, BatchedMigration, JobCompletion, MigrationIdentity, NewBatchedJob,
    NewBatchedMigration,
};
use crate::state_machine::{JobStatus, MigrationStatus};

#[derive(Debug, Default)]
struct StoreState {
    next_migration_id: i64,
    next_job_id: i64,
    migrations: BTreeMap<i64, BatchedMigration>,
    jobs: Vec<BatchedJob>,
}

/// Migration definitions and jobs held behind a mutex
#[derive(Debug, Default)]
pub struct InMemoryMigrationStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
}

impl InMemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn migration_count(&self) -> usize {
        self.state.lock().migrations.len()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MigrationError::Database(
                "connection refused: migration store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn with_migration<T>(
        &self,
        migration_id: i64,
        f: impl FnOnce(&mut BatchedMigration) -> T,
    ) -> Result<T> {
        self.check_available()?;
        let mut state = self.state.lock();
        let migration = state.migrations.get_mut(&migration_id).ok_or_else(|| {
            MigrationError::Database(format!("Batched migration {migration_id} does not exist"))
        })?;
        let result = f(migration);
        migration.updated_at = Utc::now();
        Ok(result)
    }
}

fn matches_identity(migration: &BatchedMigration, identity: &MigrationIdentity) -> bool {
    migration.job_class_name == identity.job_class_name
        && migration.table_name == identity.table_name
        && migration.column_name == identity.column_name
        && migration.job_arguments == identity.job_arguments
}

#[async_trait]
impl MigrationStore for InMemoryMigrationStore {
    async fn find_migration(&self, id: i64) -> Result<Option<BatchedMigration>> {
        self.check_available()?;
        Ok(self.state.lock().migrations.get(&id).cloned())
    }

    async fn find_migration_by_identity(
        &self,
        identity: &MigrationIdentity,
    ) -> Result<Option<BatchedMigration>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .migrations
            .values()
            .find(|migration| matches_identity(migration, identity))
            .cloned())
    }

    async fn insert_migration(
        &self,
        new_migration: NewBatchedMigration,
    ) -> Result<Option<BatchedMigration>> {
        self.check_available()?;
        let identity = new_migration.identity();
        let mut state = self.state.lock();

        if state
            .migrations
            .values()
            .any(|migration| matches_identity(migration, &identity))
        {
            return Ok(None);
        }

        state.next_migration_id += 1;
        let now = Utc::now();
        let migration = BatchedMigration {
            id: state.next_migration_id,
            job_class_name: new_migration.job_class_name,
            table_name: new_migration.table_name,
            column_name: new_migration.column_name,
            job_arguments: new_migration.job_arguments,
            schema_tag: new_migration.schema_tag,
            queued_migration_version: new_migration.queued_migration_version,
            batch_class_name: new_migration.batch_class_name,
            min_value: new_migration.min_value,
            max_value: new_migration.max_value,
            cursor_value: None,
            status: new_migration.status,
            batch_size: new_migration.batch_size,
            sub_batch_size: new_migration.sub_batch_size,
            max_batch_size: new_migration.max_batch_size,
            interval_seconds: new_migration.interval_seconds,
            total_tuple_count: new_migration.total_tuple_count,
            created_at: now,
            updated_at: now,
        };

        state.migrations.insert(migration.id, migration.clone());
        Ok(Some(migration))
    }

    async fn delete_migration(&self, identity: &MigrationIdentity) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock();

        let Some(id) = state
            .migrations
            .values()
            .find(|migration| matches_identity(migration, identity))
            .map(|migration| migration.id)
        else {
            return Ok(false);
        };

        state.migrations.remove(&id);
        state.jobs.retain(|job| job.batched_migration_id != id);
        Ok(true)
    }

    async fn list_active_migrations(
        &self,
        schema_tag: Option<&str>,
    ) -> Result<Vec<BatchedMigration>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .migrations
            .values()
            .filter(|migration| migration.status == MigrationStatus::Active)
            .filter(|migration| schema_tag.map_or(true, |tag| migration.schema_tag == tag))
            .cloned()
            .collect())
    }

    async fn update_status(&self, migration_id: i64, status: MigrationStatus) -> Result<()> {
        self.with_migration(migration_id, |migration| migration.status = status)
    }

    async fn advance_cursor(&self, migration_id: i64, cursor_value: i64) -> Result<()> {
        self.with_migration(migration_id, |migration| {
            if migration.cursor_value.map_or(true, |current| current < cursor_value) {
                migration.cursor_value = Some(cursor_value);
            }
        })
    }

    async fn update_batch_sizes(
        &self,
        migration_id: i64,
        batch_size: i64,
        sub_batch_size: i64,
    ) -> Result<()> {
        self.with_migration(migration_id, |migration| {
            migration.batch_size = batch_size;
            migration.sub_batch_size = sub_batch_size;
        })
    }

    async fn create_job(&self, new_job: NewBatchedJob) -> Result<BatchedJob> {
        self.check_available()?;
        let mut state = self.state.lock();

        if !state.migrations.contains_key(&new_job.batched_migration_id) {
            return Err(MigrationError::Database(format!(
                "Batched migration {} does not exist",
                new_job.batched_migration_id
            )));
        }

        if state.jobs.iter().any(|job| {
            job.batched_migration_id == new_job.batched_migration_id
                && job.status == JobStatus::Running
        }) {
            return Err(MigrationError::ConcurrentBatch {
                migration_id: new_job.batched_migration_id,
            });
        }

        state.next_job_id += 1;
        let job = BatchedJob {
            id: state.next_job_id,
            job_uuid: BatchedJob::generate_job_uuid(),
            batched_migration_id: new_job.batched_migration_id,
            min_value: new_job.min_value,
            max_value: new_job.max_value,
            batch_size: new_job.batch_size,
            sub_batch_size: new_job.sub_batch_size,
            status: JobStatus::Running,
            attempts: new_job.attempts,
            started_at: Some(new_job.started_at),
            finished_at: None,
            rows_processed: None,
            error_message: None,
            created_at: new_job.started_at,
        };

        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn complete_job(&self, job_uuid: Uuid, completion: JobCompletion) -> Result<BatchedJob> {
        self.check_available()?;
        let mut state = self.state.lock();

        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.job_uuid == job_uuid && job.status == JobStatus::Running)
            .ok_or_else(|| {
                MigrationError::Database(format!(
                    "Job {job_uuid} is not running and cannot be completed"
                ))
            })?;

        job.status = completion.status;
        job.finished_at = Some(completion.finished_at);
        job.rows_processed = completion.rows_processed;
        job.error_message = completion.error_message;
        Ok(job.clone())
    }

    async fn last_job(&self, migration_id: i64) -> Result<Option<BatchedJob>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .rev()
            .find(|job| job.batched_migration_id == migration_id)
            .cloned())
    }

    async fn jobs_for_migration(&self, migration_id: i64) -> Result<Vec<BatchedJob>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .filter(|job| job.batched_migration_id == migration_id)
            .cloned()
            .collect())
    }
}

/// Key sets of in-process "tables", keyed by (table, column)
#[derive(Debug, Default)]
pub struct InMemoryTables {
    tables: RwLock<HashMap<(String, String), BTreeSet<i64>>>,
}

impl InMemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table with no rows
    pub fn create_table(&self, table_name: &str, column_name: &str) {
        self.tables
            .write()
            .entry((table_name.to_string(), column_name.to_string()))
            .or_default();
    }

    /// Add key values to a table, creating it if needed
    pub fn insert_keys(&self, table_name: &str, column_name: &str, keys: impl IntoIterator<Item = i64>) {
        self.tables
            .write()
            .entry((table_name.to_string(), column_name.to_string()))
            .or_default()
            .extend(keys);
    }

    fn with_keys<T>(
        &self,
        table_name: &str,
        column_name: &str,
        f: impl FnOnce(&BTreeSet<i64>) -> T,
    ) -> Result<T> {
        let tables = self.tables.read();
        let keys = tables
            .get(&(table_name.to_string(), column_name.to_string()))
            .ok_or_else(|| {
                MigrationError::Database(format!("relation \"{table_name}\" does not exist"))
            })?;
        Ok(f(keys))
    }
}

#[async_trait]
impl TableIntrospector for InMemoryTables {
    async fn max_value(&self, table_name: &str, column_name: &str) -> Result<Option<i64>> {
        self.with_keys(table_name, column_name, |keys| keys.last().copied())
    }

    async fn cardinality_estimate(&self, table_name: &str) -> Result<Option<i64>> {
        Ok(self
            .tables
            .read()
            .iter()
            .find(|((table, _), _)| table == table_name)
            .map(|(_, keys)| keys.len() as i64))
    }

    async fn next_key(
        &self,
        table_name: &str,
        column_name: &str,
        from: i64,
    ) -> Result<Option<i64>> {
        self.with_keys(table_name, column_name, |keys| keys.range(from..).next().copied())
    }

    async fn key_at_offset(
        &self,
        table_name: &str,
        column_name: &str,
        from: i64,
        offset: i64,
    ) -> Result<Option<i64>> {
        let offset = usize::try_from(offset).map_err(|_| {
            MigrationError::InvalidBatchSettings(format!("negative key offset {offset}"))
        })?;
        self.with_keys(table_name, column_name, |keys| {
            keys.range(from..).nth(offset).copied()
        })
    }
}
