use crate::constants::DEFAULT_SCHEMA_TAG;
use crate::error::{MigrationError, Result};

/// Caller-side facts the engine cannot discover on its own: which schema the
/// caller is migrating, which deploy step is enqueueing, and whether the
/// caller currently holds an open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationContext {
    schema_tag: String,
    queued_migration_version: Option<String>,
    transaction_open: bool,
}

impl MigrationContext {
    pub fn new(schema_tag: impl Into<String>) -> Self {
        Self {
            schema_tag: schema_tag.into(),
            queued_migration_version: None,
            transaction_open: false,
        }
    }

    /// Record the deploy step (schema migration version) doing the enqueue
    pub fn with_queued_migration_version(mut self, version: impl Into<String>) -> Self {
        self.queued_migration_version = Some(version.into());
        self
    }

    /// Mark the caller as holding an open multi-statement transaction
    pub fn within_transaction(mut self) -> Self {
        self.transaction_open = true;
        self
    }

    pub fn schema_tag(&self) -> &str {
        &self.schema_tag
    }

    pub fn queued_migration_version(&self) -> Option<&str> {
        self.queued_migration_version.as_deref()
    }

    pub fn transaction_open(&self) -> bool {
        self.transaction_open
    }

    /// Fail when `operation` must commit batches independently but the caller
    /// holds a transaction open.
    pub fn ensure_no_transaction(&self, operation: &'static str) -> Result<()> {
        if self.transaction_open {
            return Err(MigrationError::TransactionOpen { operation });
        }
        Ok(())
    }
}

impl Default for MigrationContext {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_TAG)
    }
}
