use async_trait::async_trait;
use tracing::debug;

use super::{BatchBoundsStrategy, BatchContext, BatchRange};
use crate::constants::strategies;
use crate::error::Result;

/// Samples batch bounds from the table so sparse keys still yield batches of
/// roughly `batch_size` rows.
///
/// The range starts at the first existing key after the previous batch and
/// ends just before the key `batch_size` rows further on (or at `max_value`).
/// Gaps in the key space are skipped rather than handed to empty jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeysetBatchingStrategy;

#[async_trait]
impl BatchBoundsStrategy for KeysetBatchingStrategy {
    fn name(&self) -> &'static str {
        strategies::KEYSET
    }

    async fn next_range(&self, ctx: &BatchContext<'_>) -> Result<Option<BatchRange>> {
        let Some(from) = ctx.next_start()? else {
            return Ok(None);
        };

        let Some(start) = ctx
            .introspector
            .next_key(ctx.table_name, ctx.column_name, from)
            .await?
            .filter(|key| *key <= ctx.max_value)
        else {
            debug!(
                table_name = ctx.table_name,
                from = from,
                "No keys left before max_value"
            );
            return Ok(None);
        };

        let next_batch_start = ctx
            .introspector
            .key_at_offset(ctx.table_name, ctx.column_name, start, ctx.batch_size)
            .await?;

        let end = match next_batch_start {
            Some(next) if next - 1 < ctx.max_value => next - 1,
            _ => ctx.max_value,
        };

        Ok(Some(BatchRange::new(start, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryTables;

    fn sparse_table() -> InMemoryTables {
        let tables = InMemoryTables::new();
        tables.insert_keys("events", "id", [2, 4, 10, 11, 50, 51, 52, 200]);
        tables
    }

    fn ctx<'a>(tables: &'a InMemoryTables, previous_end: Option<i64>) -> BatchContext<'a> {
        BatchContext {
            table_name: "events",
            column_name: "id",
            previous_end,
            batch_size: 3,
            min_value: 1,
            max_value: 200,
            introspector: tables,
        }
    }

    #[tokio::test]
    async fn test_ranges_follow_existing_keys() {
        let tables = sparse_table();
        let strategy = KeysetBatchingStrategy;

        // keys 2, 4, 10 -> next batch starts at 11
        let first = strategy.next_range(&ctx(&tables, None)).await.unwrap();
        assert_eq!(first, Some(BatchRange::new(2, 10)));

        // keys 11, 50, 51 -> next batch starts at 52
        let second = strategy.next_range(&ctx(&tables, Some(10))).await.unwrap();
        assert_eq!(second, Some(BatchRange::new(11, 51)));

        // keys 52, 200 -> no key three rows on, range runs to max_value
        let third = strategy.next_range(&ctx(&tables, Some(51))).await.unwrap();
        assert_eq!(third, Some(BatchRange::new(52, 200)));

        let done = strategy.next_range(&ctx(&tables, Some(200))).await.unwrap();
        assert_eq!(done, None);
    }

    #[tokio::test]
    async fn test_exhausted_when_no_keys_remain_below_max() {
        let tables = sparse_table();
        let context = BatchContext {
            max_value: 100,
            ..ctx(&tables, Some(52))
        };
        assert_eq!(KeysetBatchingStrategy.next_range(&context).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_end_is_capped_at_max_value() {
        let tables = sparse_table();
        let context = BatchContext {
            max_value: 45,
            ..ctx(&tables, Some(10))
        };
        assert_eq!(
            KeysetBatchingStrategy.next_range(&context).await.unwrap(),
            Some(BatchRange::new(11, 45))
        );
    }
}
