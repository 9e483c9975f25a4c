//! # Migration Finalizer
//!
//! Synchronously drains a migration to completion, ignoring pacing and
//! backoff. Used at deploy time when later schema changes depend on the
//! migration having covered every row.
//!
//! Each batch commits on its own, so finalizing inside a caller's open
//! transaction is refused before any work starts.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::batch_runner::BatchRunner;
use super::MigrationContext;
use crate::database::MigrationStore;
use crate::error::{MigrationError, Result};
use crate::logging::log_migration_operation;
use crate::models::{BatchedMigration, MigrationIdentity};
use crate::state_machine::{determine_target_state, MigrationEvent, MigrationStatus};

pub struct MigrationFinalizer {
    store: Arc<dyn MigrationStore>,
    runner: Arc<BatchRunner>,
}

impl MigrationFinalizer {
    pub fn new(store: Arc<dyn MigrationStore>, runner: Arc<BatchRunner>) -> Self {
        Self { store, runner }
    }

    /// Run batches back to back until the migration is finished or failed.
    ///
    /// A paused migration is resumed first. A failed one is returned as-is:
    /// it needs an explicit operator resume.
    #[instrument(skip(self, ctx), fields(identity = %identity))]
    pub async fn finalize(
        &self,
        ctx: &MigrationContext,
        identity: &MigrationIdentity,
    ) -> Result<BatchedMigration> {
        ctx.ensure_no_transaction("finalize")?;

        let mut migration = self
            .store
            .find_migration_by_identity(identity)
            .await?
            .ok_or_else(|| MigrationError::MigrationNotFound {
                identity: identity.clone(),
            })?;

        match migration.status {
            MigrationStatus::Finished => return Ok(migration),
            MigrationStatus::Failed => {
                warn!(
                    migration_id = migration.id,
                    "Not finalizing a failed batched migration; resume it first"
                );
                return Ok(migration);
            }
            MigrationStatus::Paused => {
                let target =
                    determine_target_state(migration.id, migration.status, &MigrationEvent::Resume)?;
                self.store.update_status(migration.id, target).await?;
                info!(migration_id = migration.id, "Resumed paused migration to finalize it");
            }
            MigrationStatus::Active => {}
        }

        log_migration_operation(
            "finalize",
            Some(migration.id),
            &migration.job_class_name,
            &migration.table_name,
            "started",
            None,
        );

        let mut batches = 0_u64;
        loop {
            migration = self.reload(migration.id, identity).await?;
            if migration.status != MigrationStatus::Active {
                break;
            }

            let outcome = self.runner.run_next_batch(&migration, Utc::now()).await?;
            if outcome.job().is_some() {
                batches += 1;
            }
        }

        log_migration_operation(
            "finalize",
            Some(migration.id),
            &migration.job_class_name,
            &migration.table_name,
            migration.status.as_str(),
            Some(&format!("{batches} batches run")),
        );

        Ok(migration)
    }

    async fn reload(&self, migration_id: i64, identity: &MigrationIdentity) -> Result<BatchedMigration> {
        self.store
            .find_migration(migration_id)
            .await?
            .ok_or_else(|| MigrationError::MigrationNotFound {
                identity: identity.clone(),
            })
    }
}
