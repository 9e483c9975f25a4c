//! # Postgres Store
//!
//! [`MigrationStore`] and [`TableIntrospector`] over a SQLx `PgPool`. The
//! definition and job queries live on the models; this type wires them to
//! the traits and adds the introspection queries against migrated tables.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{MigrationStore, TableIntrospector};
use crate::error::Result;
use crate::models::{
    BatchedJob, BatchedMigration, JobCompletion, MigrationIdentity, NewBatchedJob,
    NewBatchedMigration,
};
use crate::state_machine::MigrationStatus;

#[derive(Debug, Clone)]
pub struct PgMigrationStore {
    pool: PgPool,
}

impl PgMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Quote a possibly schema-qualified identifier (`schema.table`)
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn find_migration(&self, id: i64) -> Result<Option<BatchedMigration>> {
        BatchedMigration::find_by_id(&self.pool, id).await
    }

    async fn find_migration_by_identity(
        &self,
        identity: &MigrationIdentity,
    ) -> Result<Option<BatchedMigration>> {
        BatchedMigration::find_by_identity(&self.pool, identity).await
    }

    async fn insert_migration(
        &self,
        new_migration: NewBatchedMigration,
    ) -> Result<Option<BatchedMigration>> {
        BatchedMigration::create(&self.pool, new_migration).await
    }

    async fn delete_migration(&self, identity: &MigrationIdentity) -> Result<bool> {
        BatchedMigration::delete_by_identity(&self.pool, identity).await
    }

    async fn list_active_migrations(
        &self,
        schema_tag: Option<&str>,
    ) -> Result<Vec<BatchedMigration>> {
        BatchedMigration::list_active(&self.pool, schema_tag).await
    }

    async fn update_status(&self, migration_id: i64, status: MigrationStatus) -> Result<()> {
        BatchedMigration::update_status(&self.pool, migration_id, status).await
    }

    async fn advance_cursor(&self, migration_id: i64, cursor_value: i64) -> Result<()> {
        BatchedMigration::advance_cursor(&self.pool, migration_id, cursor_value).await
    }

    async fn update_batch_sizes(
        &self,
        migration_id: i64,
        batch_size: i64,
        sub_batch_size: i64,
    ) -> Result<()> {
        BatchedMigration::update_batch_sizes(&self.pool, migration_id, batch_size, sub_batch_size)
            .await
    }

    async fn create_job(&self, new_job: NewBatchedJob) -> Result<BatchedJob> {
        BatchedJob::create(&self.pool, new_job).await
    }

    async fn complete_job(&self, job_uuid: Uuid, completion: JobCompletion) -> Result<BatchedJob> {
        BatchedJob::complete(&self.pool, job_uuid, completion).await
    }

    async fn last_job(&self, migration_id: i64) -> Result<Option<BatchedJob>> {
        BatchedJob::find_last_for_migration(&self.pool, migration_id).await
    }

    async fn jobs_for_migration(&self, migration_id: i64) -> Result<Vec<BatchedJob>> {
        BatchedJob::find_by_migration(&self.pool, migration_id).await
    }
}

#[async_trait]
impl TableIntrospector for PgMigrationStore {
    #[instrument(skip(self))]
    async fn max_value(&self, table_name: &str, column_name: &str) -> Result<Option<i64>> {
        let query = format!(
            "SELECT MAX({column})::BIGINT FROM {table}",
            column = quote_identifier(column_name),
            table = quote_identifier(table_name),
        );

        let (max,): (Option<i64>,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        debug!(max_value = ?max, "Resolved batching upper bound");
        Ok(max)
    }

    async fn cardinality_estimate(&self, table_name: &str) -> Result<Option<i64>> {
        // reltuples is -1 for tables that have never been analyzed
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT reltuples::BIGINT FROM pg_class WHERE oid = to_regclass($1)",
        )
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(estimate,)| estimate).filter(|estimate| *estimate >= 0))
    }

    async fn next_key(
        &self,
        table_name: &str,
        column_name: &str,
        from: i64,
    ) -> Result<Option<i64>> {
        let query = format!(
            "SELECT {column}::BIGINT FROM {table} WHERE {column} >= $1 ORDER BY {column} ASC LIMIT 1",
            column = quote_identifier(column_name),
            table = quote_identifier(table_name),
        );

        let row: Option<(i64,)> = sqlx::query_as(&query)
            .bind(from)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(key,)| key))
    }

    async fn key_at_offset(
        &self,
        table_name: &str,
        column_name: &str,
        from: i64,
        offset: i64,
    ) -> Result<Option<i64>> {
        let query = format!(
            "SELECT {column}::BIGINT FROM {table} WHERE {column} >= $1 \
             ORDER BY {column} ASC OFFSET $2 LIMIT 1",
            column = quote_identifier(column_name),
            table = quote_identifier(table_name),
        );

        let row: Option<(i64,)> = sqlx::query_as(&query)
            .bind(from)
            .bind(offset)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(key,)| key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("events"), "\"events\"");
        assert_eq!(quote_identifier("public.events"), "\"public\".\"events\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
