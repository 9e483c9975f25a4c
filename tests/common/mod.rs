//! Shared fixtures for the engine integration tests: an engine wired to the
//! in-memory store, plus scriptable migration jobs.

#![allow(dead_code)]

pub mod jobs;
pub mod strategies;

pub use jobs::*;

use std::sync::Arc;
use std::time::Duration;

use batched_migrations::config::MigrationsConfig;
use batched_migrations::database::{InMemoryMigrationStore, InMemoryTables};
use batched_migrations::orchestration::{EnqueueRequest, MigrationEngine};
use batched_migrations::registry::JobRegistry;

pub const JOB_CLASS: &str = "CopyColumnUsingBackgroundMigrationJob";
pub const TABLE: &str = "events";
pub const COLUMN: &str = "id";
pub const INTERVAL: Duration = Duration::from_secs(120);

/// Engine over the in-memory store with direct access to its parts
pub struct TestEngine {
    pub store: Arc<InMemoryMigrationStore>,
    pub tables: Arc<InMemoryTables>,
    pub jobs: Arc<JobRegistry>,
    pub engine: MigrationEngine,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(MigrationsConfig::default())
    }

    pub fn with_config(config: MigrationsConfig) -> Self {
        let store = Arc::new(InMemoryMigrationStore::new());
        let tables = Arc::new(InMemoryTables::new());
        let jobs = Arc::new(JobRegistry::new());
        let engine = MigrationEngine::new(store.clone(), tables.clone(), jobs.clone(), config);

        Self {
            store,
            tables,
            jobs,
            engine,
        }
    }

    /// Register `job` under [`JOB_CLASS`]
    pub fn register(&self, job: Arc<RecordingJob>) -> Arc<RecordingJob> {
        self.jobs.register(JOB_CLASS, job.clone());
        job
    }
}

/// Request over `[1, max_value]` of [`TABLE`].[`COLUMN`] with explicit sizes
pub fn request(max_value: i64, batch_size: i64) -> EnqueueRequest {
    EnqueueRequest::new(JOB_CLASS, TABLE, COLUMN, INTERVAL)
        .with_min_value(1)
        .with_max_value(max_value)
        .with_batch_size(batch_size)
        .with_sub_batch_size(batch_size.min(100))
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("batched_migrations=debug")
        .with_test_writer()
        .try_init();
}
