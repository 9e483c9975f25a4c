//! # Engine Configuration
//!
//! Layered configuration for the batched migration engine:
//!
//! 1. built-in defaults (see [`crate::constants`])
//! 2. `config/batched_migrations.toml`
//! 3. `config/batched_migrations.{environment}.toml`
//! 4. `BBM__SECTION__FIELD` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use batched_migrations::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let floor = manager.config().engine.minimum_interval();
//! let strict = manager.config().engine.strict_mode;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Connection settings for the Postgres-backed store
    pub database: DatabaseConfig,

    /// Batching, pacing and health-gate behaviour
    pub engine: EngineConfig,

    /// Retry backoff applied after failed batches
    pub backoff: BackoffConfig,
}

impl MigrationsConfig {
    /// Validate cross-field constraints after loading
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.engine.minimum_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.minimum_interval_seconds",
                "0",
                "the pacing floor must be at least one second",
            ));
        }

        if self.engine.default_batch_size < 1 {
            return Err(ConfigurationError::invalid_value(
                "engine.default_batch_size",
                self.engine.default_batch_size.to_string(),
                "batch size must be at least 1",
            ));
        }

        if self.engine.default_sub_batch_size < 1
            || self.engine.default_sub_batch_size > self.engine.default_batch_size
        {
            return Err(ConfigurationError::invalid_value(
                "engine.default_sub_batch_size",
                self.engine.default_sub_batch_size.to_string(),
                "sub-batch size must be between 1 and the default batch size",
            ));
        }

        if self.engine.max_batch_attempts < 1 {
            return Err(ConfigurationError::invalid_value(
                "engine.max_batch_attempts",
                self.engine.max_batch_attempts.to_string(),
                "at least one attempt is required",
            ));
        }

        if self.engine.stale_job_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.stale_job_timeout_seconds",
                "0",
                "running jobs need at least one second before they count as abandoned",
            ));
        }

        if self.backoff.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.backoff_multiplier",
                self.backoff.backoff_multiplier.to_string(),
                "multiplier must be >= 1.0",
            ));
        }

        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `DATABASE_URL` is used when absent
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl DatabaseConfig {
    /// Resolve the connection URL, falling back to `DATABASE_URL`
    pub fn database_url(&self) -> ConfigResult<String> {
        if let Some(url) = self.url.as_ref().filter(|url| !url.is_empty()) {
            return Ok(url.clone());
        }

        std::env::var("DATABASE_URL").map_err(|_| {
            ConfigurationError::missing_required_field("database.url", "database configuration")
        })
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

/// Engine behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Floor applied to every migration's interval
    pub minimum_interval_seconds: u64,
    pub default_batch_size: i64,
    pub default_sub_batch_size: i64,
    pub default_min_value: i64,
    /// Attempts allowed per key range before the migration fails
    pub max_batch_attempts: i32,
    /// A job still `running` after this long is recorded as a failed attempt
    pub stale_job_timeout_seconds: u64,
    /// Treat a missing migration in `ensure_finished` as fatal
    pub strict_mode: bool,
    /// Command prefix printed in the remediation hint
    pub remediation_command: String,
    /// Restrict the scheduler to migrations carrying this schema tag
    pub schema_tag: Option<String>,
}

impl EngineConfig {
    pub fn minimum_interval(&self) -> Duration {
        Duration::from_secs(self.minimum_interval_seconds)
    }

    pub fn stale_job_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_job_timeout_seconds)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            minimum_interval_seconds: constants::BATCH_MIN_DELAY.as_secs(),
            default_batch_size: constants::BATCH_SIZE,
            default_sub_batch_size: constants::SUB_BATCH_SIZE,
            default_min_value: constants::BATCH_MIN_VALUE,
            max_batch_attempts: constants::MAX_BATCH_ATTEMPTS,
            stale_job_timeout_seconds: constants::STALE_JOB_TIMEOUT.as_secs(),
            strict_mode: false,
            remediation_command: constants::DEFAULT_REMEDIATION_COMMAND.to_string(),
            schema_tag: None,
        }
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl BackoffConfig {
    /// Wait required after `failed_attempts` consecutive failures of one range.
    ///
    /// Never shorter than `interval`; grows geometrically and is capped at
    /// `max_backoff_seconds` (the cap never undercuts `interval`).
    pub fn retry_delay(&self, interval: Duration, failed_attempts: i32) -> Duration {
        if failed_attempts <= 0 {
            return interval;
        }

        let exponent = failed_attempts.saturating_sub(1).min(32);
        let scaled = interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_backoff_seconds as f64);

        interval.max(Duration::from_secs_f64(capped.max(0.0)))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            backoff_multiplier: constants::BACKOFF_MULTIPLIER,
            max_backoff_seconds: constants::MAX_BACKOFF_SECONDS,
        }
    }
}
