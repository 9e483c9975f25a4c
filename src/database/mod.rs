//! # Database Operations
//!
//! Persistence seams of the engine and their implementations.
//!
//! ## Key Components
//!
//! - [`MigrationStore`] - persisted migration definitions and their job records
//! - [`TableIntrospector`] - read-only queries against the table being migrated
//!   (`MAX(column)`, cardinality estimate, key sampling for sparse batching)
//! - [`postgres`] - both seams over a SQLx `PgPool`
//! - [`memory`] - both seams held in process, for embedding and tests
//! - [`connection`] / [`migrations`] - pool construction and the engine's own schema
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use batched_migrations::config::DatabaseConfig;
//! use batched_migrations::database::{DatabaseConnection, PgMigrationStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! connection.run_migrations().await?;
//! let store = PgMigrationStore::new(connection.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    BatchedJob, BatchedMigration, JobCompletion, MigrationIdentity, NewBatchedJob,
    NewBatchedMigration,
};
use crate::state_machine::MigrationStatus;

pub use connection::DatabaseConnection;
pub use memory::{InMemoryMigrationStore, InMemoryTables};
pub use postgres::PgMigrationStore;

/// Persistence of migration definitions and their append-only job records
#[async_trait]
pub trait MigrationStore: Send + Sync {
    async fn find_migration(&self, id: i64) -> Result<Option<BatchedMigration>>;

    async fn find_migration_by_identity(
        &self,
        identity: &MigrationIdentity,
    ) -> Result<Option<BatchedMigration>>;

    /// Insert a definition; `None` when one with the same identity exists
    async fn insert_migration(
        &self,
        new_migration: NewBatchedMigration,
    ) -> Result<Option<BatchedMigration>>;

    /// Remove a definition and its jobs; `false` when nothing matched
    async fn delete_migration(&self, identity: &MigrationIdentity) -> Result<bool>;

    /// Active definitions in id order, optionally restricted to one schema tag
    async fn list_active_migrations(&self, schema_tag: Option<&str>)
        -> Result<Vec<BatchedMigration>>;

    async fn update_status(&self, migration_id: i64, status: MigrationStatus) -> Result<()>;

    /// Move the cursor forward; never regresses
    async fn advance_cursor(&self, migration_id: i64, cursor_value: i64) -> Result<()>;

    async fn update_batch_sizes(
        &self,
        migration_id: i64,
        batch_size: i64,
        sub_batch_size: i64,
    ) -> Result<()>;

    /// Create a running job; `ConcurrentBatch` if one is already running
    async fn create_job(&self, new_job: NewBatchedJob) -> Result<BatchedJob>;

    /// Record the terminal outcome of a running job
    async fn complete_job(&self, job_uuid: Uuid, completion: JobCompletion) -> Result<BatchedJob>;

    async fn last_job(&self, migration_id: i64) -> Result<Option<BatchedJob>>;

    async fn jobs_for_migration(&self, migration_id: i64) -> Result<Vec<BatchedJob>>;
}

/// Read-only queries against the table a migration batches over
#[async_trait]
pub trait TableIntrospector: Send + Sync {
    /// `SELECT MAX(column) FROM table`; `None` for an empty table
    async fn max_value(&self, table_name: &str, column_name: &str) -> Result<Option<i64>>;

    /// Planner estimate of the row count; `None` when unknown
    async fn cardinality_estimate(&self, table_name: &str) -> Result<Option<i64>>;

    /// Smallest key `>= from`
    async fn next_key(&self, table_name: &str, column_name: &str, from: i64)
        -> Result<Option<i64>>;

    /// Key found `offset` rows after the smallest key `>= from`
    async fn key_at_offset(
        &self,
        table_name: &str,
        column_name: &str,
        from: i64,
        offset: i64,
    ) -> Result<Option<i64>>;
}
