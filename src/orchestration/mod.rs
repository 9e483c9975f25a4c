//! # Orchestration
//!
//! Lifecycle of batched migrations on top of the store and the batching
//! strategies.
//!
//! ## Core Components
//!
//! - **MigrationRegistry**: enqueue (idempotent on the identity key), delete,
//!   lookup and operator actions (pause, resume, batch resizing)
//! - **BatchRunner**: runs one batch of one migration, with retries of failed
//!   ranges and the status transitions they cause
//! - **BatchScheduler**: paced, trigger-driven execution honoring each
//!   migration's interval and the retry backoff
//! - **MigrationFinalizer**: drains a migration to completion without pacing
//! - **HealthGate**: deploy-time assertion that a migration has finished
//! - **MigrationEngine**: all of the above wired to one store
//!
//! ## Example
//!
//! ```rust,no_run
//! use batched_migrations::config::MigrationsConfig;
//! use batched_migrations::orchestration::{EnqueueRequest, MigrationContext, MigrationEngine};
//! use batched_migrations::registry::JobRegistry;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(pool: sqlx::PgPool) -> batched_migrations::Result<()> {
//! let engine = MigrationEngine::with_pool(pool, Arc::new(JobRegistry::new()), MigrationsConfig::default());
//! let ctx = MigrationContext::default();
//!
//! let migration = engine
//!     .registry()
//!     .enqueue(&ctx, EnqueueRequest::new("CopyColumn", "events", "id", Duration::from_secs(120)))
//!     .await?;
//!
//! engine.scheduler().tick().await?;
//! engine.health_gate().ensure_finished(&ctx, &migration.identity(), true).await?;
//! # Ok(())
//! # }
//! ```

pub mod batch_runner;
pub mod batch_scheduler;
pub mod context;
pub mod engine;
pub mod health_gate;
pub mod migration_finalizer;
pub mod migration_registry;

pub use batch_runner::{BatchOutcome, BatchRunner};
pub use batch_scheduler::{BatchScheduler, TickOutcome};
pub use context::MigrationContext;
pub use engine::MigrationEngine;
pub use health_gate::{GateOutcome, HealthGate};
pub use migration_finalizer::MigrationFinalizer;
pub use migration_registry::{validate_batch_sizes, EnqueueRequest, MigrationRegistry};
