//! # Health Gate
//!
//! Deploy-time check that a migration has completed before code depending on
//! it proceeds. Optionally drains the migration first through the
//! [`MigrationFinalizer`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

use super::migration_finalizer::MigrationFinalizer;
use super::MigrationContext;
use crate::config::EngineConfig;
use crate::database::MigrationStore;
use crate::error::{MigrationError, Result};
use crate::models::MigrationIdentity;

/// Non-fatal results of [`HealthGate::ensure_finished`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Finished,
    /// No such migration; tolerated outside strict mode
    NotFound,
}

pub struct HealthGate {
    store: Arc<dyn MigrationStore>,
    finalizer: Arc<MigrationFinalizer>,
    strict_mode: bool,
    remediation_command: String,
}

impl HealthGate {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        finalizer: Arc<MigrationFinalizer>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            finalizer,
            strict_mode: config.strict_mode,
            remediation_command: config.remediation_command.clone(),
        }
    }

    /// Fail unless the migration is finished, finalizing it first if asked.
    ///
    /// The error for an unfinished migration carries the identity, the
    /// current status and a manual finalize command.
    #[instrument(skip(self, ctx), fields(identity = %identity))]
    pub async fn ensure_finished(
        &self,
        ctx: &MigrationContext,
        identity: &MigrationIdentity,
        finalize: bool,
    ) -> Result<GateOutcome> {
        ctx.ensure_no_transaction("ensure_finished")?;

        let Some(migration) = self.store.find_migration_by_identity(identity).await? else {
            if self.strict_mode {
                return Err(MigrationError::NonExistentMigration {
                    identity: identity.clone(),
                });
            }
            warn!(
                identity = %identity,
                "Could not find batched background migration for the given configuration"
            );
            return Ok(GateOutcome::NotFound);
        };

        if migration.is_finished() {
            return Ok(GateOutcome::Finished);
        }

        let migration = if finalize {
            self.finalizer.finalize(ctx, identity).await?
        } else {
            migration
        };

        if migration.is_finished() {
            return Ok(GateOutcome::Finished);
        }

        Err(MigrationError::NotFinished {
            identity: identity.clone(),
            status: migration.status.to_string(),
            remediation: identity.remediation_command(&self.remediation_command),
        })
    }
}
