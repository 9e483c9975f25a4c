use async_trait::async_trait;

use super::{BatchBoundsStrategy, BatchContext, BatchRange};
use crate::constants::strategies;
use crate::error::Result;

/// Treats the batching column as a dense, ordered integer key.
///
/// `start = previous_end + 1` (or `min_value` first), `end = min(start +
/// batch_size - 1, max_value)`. Never touches the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimaryKeyBatchingStrategy;

#[async_trait]
impl BatchBoundsStrategy for PrimaryKeyBatchingStrategy {
    fn name(&self) -> &'static str {
        strategies::PRIMARY_KEY
    }

    async fn next_range(&self, ctx: &BatchContext<'_>) -> Result<Option<BatchRange>> {
        let Some(start) = ctx.next_start()? else {
            return Ok(None);
        };

        let end = start
            .saturating_add(ctx.batch_size - 1)
            .min(ctx.max_value);

        Ok(Some(BatchRange::new(start, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryTables;

    fn ctx<'a>(
        tables: &'a InMemoryTables,
        previous_end: Option<i64>,
        batch_size: i64,
    ) -> BatchContext<'a> {
        BatchContext {
            table_name: "events",
            column_name: "id",
            previous_end,
            batch_size,
            min_value: 1,
            max_value: 2_500,
            introspector: tables,
        }
    }

    #[tokio::test]
    async fn test_ranges_cover_key_space_in_order() {
        let tables = InMemoryTables::new();
        let strategy = PrimaryKeyBatchingStrategy;

        let first = strategy.next_range(&ctx(&tables, None, 1_000)).await.unwrap();
        assert_eq!(first, Some(BatchRange::new(1, 1_000)));

        let second = strategy
            .next_range(&ctx(&tables, Some(1_000), 1_000))
            .await
            .unwrap();
        assert_eq!(second, Some(BatchRange::new(1_001, 2_000)));

        let last = strategy
            .next_range(&ctx(&tables, Some(2_000), 1_000))
            .await
            .unwrap();
        assert_eq!(last, Some(BatchRange::new(2_001, 2_500)));

        let done = strategy
            .next_range(&ctx(&tables, Some(2_500), 1_000))
            .await
            .unwrap();
        assert_eq!(done, None);
    }

    #[tokio::test]
    async fn test_batch_size_change_applies_to_next_range() {
        let tables = InMemoryTables::new();
        let range = PrimaryKeyBatchingStrategy
            .next_range(&ctx(&tables, Some(1_000), 250))
            .await
            .unwrap();
        assert_eq!(range, Some(BatchRange::new(1_001, 1_250)));
    }

    #[tokio::test]
    async fn test_invalid_batch_size_is_rejected() {
        let tables = InMemoryTables::new();
        assert!(PrimaryKeyBatchingStrategy
            .next_range(&ctx(&tables, None, 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_single_value_range() {
        let tables = InMemoryTables::new();
        let context = BatchContext {
            min_value: 7,
            max_value: 7,
            ..ctx(&tables, None, 1_000)
        };
        let range = PrimaryKeyBatchingStrategy.next_range(&context).await.unwrap();
        assert_eq!(range, Some(BatchRange::new(7, 7)));
    }
}
