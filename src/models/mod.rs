pub mod batched_job;
pub mod batched_migration;
pub mod identity;

// Re-export core models for easy access
pub use batched_job::{BatchedJob, JobCompletion, NewBatchedJob};
pub use batched_migration::{BatchedMigration, NewBatchedMigration};
pub use identity::MigrationIdentity;
