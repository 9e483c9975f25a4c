//! Error types for the batched migration engine.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::models::MigrationIdentity;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown background migration job '{job_class_name}': no job is registered under that name")]
    UnknownJob { job_class_name: String },

    #[error("Unknown batching strategy '{name}'")]
    UnknownBatchingStrategy { name: String },

    #[error("Wrong number of job arguments for {job_class_name} (given {given}, expected {expected})")]
    WrongArgumentCount {
        job_class_name: String,
        given: usize,
        expected: usize,
    },

    #[error("Invalid batch settings: {0}")]
    InvalidBatchSettings(String),

    #[error(
        "`{operation}` cannot be run inside a transaction; \
         run it on a connection without an open transaction"
    )]
    TransactionOpen { operation: &'static str },

    #[error("Could not find batched background migration for {identity}")]
    MigrationNotFound { identity: MigrationIdentity },

    #[error("Called ensure_finished with non-existent migration {identity}")]
    NonExistentMigration { identity: MigrationIdentity },

    #[error(
        "Expected batched background migration for the given configuration to be marked as \
         'finished', but it is '{status}':\n\t{identity}\n\n\
         Finalize it manually by running the following command:\n\n\t{remediation}"
    )]
    NotFinished {
        identity: MigrationIdentity,
        status: String,
        remediation: String,
    },

    #[error("Batched migration {migration_id} already has a running job")]
    ConcurrentBatch { migration_id: i64 },

    #[error("Invalid status transition for migration {migration_id}: {from} -> {event}")]
    InvalidTransition {
        migration_id: i64,
        from: String,
        event: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MigrationError {
    /// True for errors that mean the caller supplied a bad definition.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnknownJob { .. }
                | Self::UnknownBatchingStrategy { .. }
                | Self::WrongArgumentCount { .. }
                | Self::InvalidBatchSettings(_)
        )
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for MigrationError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        MigrationError::Database(format!("Schema migration failed: {err}"))
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

impl From<ConfigurationError> for MigrationError {
    fn from(err: ConfigurationError) -> Self {
        MigrationError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
