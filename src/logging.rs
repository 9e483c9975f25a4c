//! # Structured Logging Module
//!
//! Environment-aware structured logging for the migration engine. Console
//! output by default, JSON lines when `BBM_LOG_FORMAT=json`.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| get_log_level(&environment));
        let json = std::env::var("BBM_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console_layer = if json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(filter))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(filter))
                .boxed()
        };

        // An embedding application may already own the global subscriber.
        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "STRUCTURED LOGGING: initialized"
        );
    });
}

/// Current environment from `BBM_ENV`, defaulting to development
pub fn get_environment() -> String {
    std::env::var("BBM_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Default filter for an environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for migration-level operations
pub fn log_migration_operation(
    operation: &str,
    migration_id: Option<i64>,
    job_class_name: &str,
    table_name: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        migration_id = migration_id,
        job_class_name = %job_class_name,
        table_name = %table_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "MIGRATION_OPERATION"
    );
}

/// Log structured data for a single batch outcome
pub fn log_batch_operation(
    operation: &str,
    migration_id: i64,
    min_value: i64,
    max_value: i64,
    attempts: i32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        migration_id = migration_id,
        min_value = min_value,
        max_value = max_value,
        attempts = attempts,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "BATCH_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_migration_operation("enqueue", Some(1), "CopyColumn", "events", "active", None);
    }
}
