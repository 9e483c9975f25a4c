//! # Migration Engine
//!
//! Wires the registry, runner, scheduler, finalizer and health gate to one
//! store, one table introspector and one job registry.

use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::{
    BatchRunner, BatchScheduler, HealthGate, MigrationFinalizer, MigrationRegistry,
};
use crate::config::MigrationsConfig;
use crate::database::{MigrationStore, PgMigrationStore, TableIntrospector};
use crate::registry::JobRegistry;

pub struct MigrationEngine {
    config: MigrationsConfig,
    jobs: Arc<JobRegistry>,
    registry: MigrationRegistry,
    scheduler: BatchScheduler,
    finalizer: Arc<MigrationFinalizer>,
    health_gate: HealthGate,
}

impl MigrationEngine {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        introspector: Arc<dyn TableIntrospector>,
        jobs: Arc<JobRegistry>,
        config: MigrationsConfig,
    ) -> Self {
        let runner = Arc::new(BatchRunner::new(
            Arc::clone(&store),
            Arc::clone(&introspector),
            Arc::clone(&jobs),
            &config.engine,
        ));
        let registry = MigrationRegistry::new(
            Arc::clone(&store),
            introspector,
            Arc::clone(&jobs),
            config.engine.clone(),
        );
        let scheduler = BatchScheduler::new(Arc::clone(&store), Arc::clone(&runner), &config);
        let finalizer = Arc::new(MigrationFinalizer::new(Arc::clone(&store), runner));
        let health_gate = HealthGate::new(store, Arc::clone(&finalizer), &config.engine);

        info!(
            registered_jobs = jobs.len(),
            max_batch_attempts = config.engine.max_batch_attempts,
            strict_mode = config.engine.strict_mode,
            "Batched migration engine initialized"
        );

        Self {
            config,
            jobs,
            registry,
            scheduler,
            finalizer,
            health_gate,
        }
    }

    /// Engine over Postgres, which serves as both store and introspector
    pub fn with_pool(pool: PgPool, jobs: Arc<JobRegistry>, config: MigrationsConfig) -> Self {
        let store = Arc::new(PgMigrationStore::new(pool));
        Self::new(store.clone(), store, jobs, config)
    }

    pub fn config(&self) -> &MigrationsConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    pub fn finalizer(&self) -> &MigrationFinalizer {
        &self.finalizer
    }

    pub fn health_gate(&self) -> &HealthGate {
        &self.health_gate
    }
}
