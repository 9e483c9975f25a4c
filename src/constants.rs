//! # Engine Constants
//!
//! Defaults and fixed limits that define the operational boundaries of the
//! batched migration engine. Most of these can be overridden through
//! [`crate::config::EngineConfig`]; the values here are what an empty
//! configuration resolves to.

use std::time::Duration;

/// Number of rows handed to a single job invocation.
pub const BATCH_SIZE: i64 = 1_000;

/// Number of rows a job processes per inner chunk.
pub const SUB_BATCH_SIZE: i64 = 100;

/// First key value covered when the caller does not supply one.
pub const BATCH_MIN_VALUE: i64 = 1;

/// Minimum spacing between two batches of the same migration.
pub const BATCH_MIN_DELAY: Duration = Duration::from_secs(120);

/// Attempts allowed for one key range before the migration is marked failed.
pub const MAX_BATCH_ATTEMPTS: i32 = 3;

/// Time after which a job still marked running is treated as abandoned.
pub const STALE_JOB_TIMEOUT: Duration = Duration::from_secs(3_600);

/// Upper bound applied to retry backoff.
pub const MAX_BACKOFF_SECONDS: u64 = 3_600;

/// Growth factor applied to the interval for each failed attempt.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Schema tag used when neither the request nor the context names one.
pub const DEFAULT_SCHEMA_TAG: &str = "main";

/// Prefix of the manual remediation command printed by the health gate.
pub const DEFAULT_REMEDIATION_COMMAND: &str = "batched-migrations finalize";

/// Batching strategy discriminators stored on each migration.
pub mod strategies {
    /// Dense, ordered integer key.
    pub const PRIMARY_KEY: &str = "PrimaryKeyBatchingStrategy";
    /// Sparse key, bounds sampled from the table itself.
    pub const KEYSET: &str = "KeysetBatchingStrategy";

    /// Strategy used when the caller does not choose one.
    pub const DEFAULT: &str = PRIMARY_KEY;
}
