#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batched Migrations
//!
//! Batched background migrations for live PostgreSQL tables.
//!
//! ## Overview
//!
//! A data transformation over a large table (backfilling a column, copying
//! values, rewriting references) cannot run as one statement or one
//! transaction against a live database. This crate splits the transformation
//! over a key range into many small, independently committed batches,
//! persists progress so execution survives restarts, and paces batches so
//! the live store is never saturated.
//!
//! ## Key Features
//!
//! - **Idempotent enqueue**: definitions are deduplicated on their identity
//!   key (job class, table, column, job arguments)
//! - **Pluggable batching**: dense primary key ranges or keyset sampling for
//!   sparse keys, selected per migration
//! - **Pacing and retries**: a minimum interval between batches, retries of
//!   the exact failed range with backoff, and an attempt ceiling
//! - **Finalize and verify**: drain a migration synchronously at deploy time
//!   and assert completion before dependent changes proceed
//!
//! ## Module Organization
//!
//! - [`models`] - Migration definitions, job records and the identity key
//! - [`database`] - Store and table introspection seams (Postgres and in-memory)
//! - [`batching`] - Batch boundary strategies
//! - [`registry`] - Job trait and name-based job registry
//! - [`orchestration`] - Enqueue, scheduling, finalize and health gate
//! - [`state_machine`] - Migration and job statuses and their transitions
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batched_migrations::config::ConfigManager;
//! use batched_migrations::database::DatabaseConnection;
//! use batched_migrations::orchestration::MigrationEngine;
//! use batched_migrations::registry::JobRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! batched_migrations::logging::init_structured_logging();
//!
//! let config = ConfigManager::load()?.config().clone();
//! let connection = DatabaseConnection::connect(&config.database).await?;
//! connection.run_migrations().await?;
//!
//! let jobs = Arc::new(JobRegistry::new());
//! let engine = MigrationEngine::with_pool(connection.pool().clone(), jobs, config);
//!
//! // Called periodically by the host application
//! engine.scheduler().tick().await?;
//! # Ok(())
//! # }
//! ```

pub mod batching;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;

pub use batching::{BatchBoundsStrategy, BatchRange, BatchingStrategy};
pub use config::{BackoffConfig, DatabaseConfig, EngineConfig, MigrationsConfig};
pub use database::{InMemoryMigrationStore, InMemoryTables, MigrationStore, PgMigrationStore, TableIntrospector};
pub use error::{MigrationError, Result};
pub use models::{BatchedJob, BatchedMigration, MigrationIdentity};
pub use orchestration::{
    EnqueueRequest, GateOutcome, MigrationContext, MigrationEngine, TickOutcome,
};
pub use registry::{BatchArguments, BatchReport, JobRegistry, MigrationJob};
pub use state_machine::{JobStatus, MigrationStatus};
