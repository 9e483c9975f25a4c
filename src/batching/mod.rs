//! # Batching Strategies
//!
//! A strategy answers one question: given where the previous batch ended,
//! which inclusive key range comes next? Every strategy is monotonic (ranges
//! never overlap or regress) and reports exhaustion with `None` once the
//! previous end has reached `max_value`.
//!
//! Migrations store the strategy as a discriminator string; [`BatchingStrategy`]
//! resolves it to one of a closed set of variants:
//!
//! | Discriminator | Variant | Key assumption |
//! |---|---|---|
//! | `PrimaryKeyBatchingStrategy` | [`PrimaryKeyBatchingStrategy`] | dense integer key |
//! | `KeysetBatchingStrategy` | [`KeysetBatchingStrategy`] | sparse key, bounds sampled from the table |

pub mod keyset;
pub mod primary_key;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::strategies;
use crate::database::TableIntrospector;
use crate::error::{MigrationError, Result};

pub use keyset::KeysetBatchingStrategy;
pub use primary_key::PrimaryKeyBatchingStrategy;

/// Inclusive key range processed by one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRange {
    pub start: i64,
    pub end: i64,
}

impl BatchRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of key values covered (not necessarily rows)
    pub fn width(&self) -> i64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for BatchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Inputs for computing the next range of one migration
pub struct BatchContext<'a> {
    pub table_name: &'a str,
    pub column_name: &'a str,
    /// End of the last succeeded batch; `None` before the first
    pub previous_end: Option<i64>,
    pub batch_size: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub introspector: &'a dyn TableIntrospector,
}

impl<'a> BatchContext<'a> {
    /// First key a new range may start at, or `None` when the range is exhausted
    pub fn next_start(&self) -> Result<Option<i64>> {
        if self.batch_size < 1 {
            return Err(MigrationError::InvalidBatchSettings(format!(
                "batch_size must be at least 1, got {}",
                self.batch_size
            )));
        }

        let start = match self.previous_end {
            Some(previous_end) if previous_end >= self.max_value => return Ok(None),
            Some(previous_end) => (previous_end + 1).max(self.min_value),
            None => self.min_value,
        };

        Ok((start <= self.max_value).then_some(start))
    }
}

/// Computes the key range of the next batch
#[async_trait]
pub trait BatchBoundsStrategy: Send + Sync {
    /// Discriminator stored on the migration
    fn name(&self) -> &'static str;

    async fn next_range(&self, ctx: &BatchContext<'_>) -> Result<Option<BatchRange>>;
}

/// Closed set of strategies selectable per migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchingStrategy {
    PrimaryKey(PrimaryKeyBatchingStrategy),
    Keyset(KeysetBatchingStrategy),
}

impl BatchingStrategy {
    /// Resolve a stored discriminator
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            strategies::PRIMARY_KEY => Ok(Self::PrimaryKey(PrimaryKeyBatchingStrategy)),
            strategies::KEYSET => Ok(Self::Keyset(KeysetBatchingStrategy)),
            _ => Err(MigrationError::UnknownBatchingStrategy {
                name: name.to_string(),
            }),
        }
    }
}

impl Default for BatchingStrategy {
    fn default() -> Self {
        Self::PrimaryKey(PrimaryKeyBatchingStrategy)
    }
}

#[async_trait]
impl BatchBoundsStrategy for BatchingStrategy {
    fn name(&self) -> &'static str {
        match self {
            Self::PrimaryKey(strategy) => strategy.name(),
            Self::Keyset(strategy) => strategy.name(),
        }
    }

    async fn next_range(&self, ctx: &BatchContext<'_>) -> Result<Option<BatchRange>> {
        match self {
            Self::PrimaryKey(strategy) => strategy.next_range(ctx).await,
            Self::Keyset(strategy) => strategy.next_range(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(
            BatchingStrategy::from_name("PrimaryKeyBatchingStrategy").unwrap(),
            BatchingStrategy::PrimaryKey(PrimaryKeyBatchingStrategy)
        );
        assert_eq!(
            BatchingStrategy::from_name("KeysetBatchingStrategy")
                .unwrap()
                .name(),
            "KeysetBatchingStrategy"
        );

        let err = BatchingStrategy::from_name("LooseIndexScanBatchingStrategy").unwrap_err();
        assert!(matches!(err, MigrationError::UnknownBatchingStrategy { .. }));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_default_strategy_is_primary_key() {
        assert_eq!(BatchingStrategy::default().name(), strategies::DEFAULT);
    }

    #[test]
    fn test_range_width_and_display() {
        let range = BatchRange::new(1_001, 2_000);
        assert_eq!(range.width(), 1_000);
        assert_eq!(range.to_string(), "[1001, 2000]");
    }
}
