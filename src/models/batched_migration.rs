//! # Batched Migration Model
//!
//! One configured key-range transformation plus its progress cursor.
//!
//! ## Database Schema
//!
//! Maps to `batched_background_migrations`:
//! ```sql
//! CREATE TABLE batched_background_migrations (
//!   id BIGSERIAL PRIMARY KEY,
//!   job_class_name TEXT NOT NULL,
//!   table_name TEXT NOT NULL,
//!   column_name TEXT NOT NULL,
//!   job_arguments JSONB NOT NULL DEFAULT '[]',
//!   schema_tag TEXT NOT NULL,
//!   queued_migration_version TEXT,
//!   batch_class_name TEXT NOT NULL,
//!   min_value BIGINT NOT NULL,
//!   max_value BIGINT NOT NULL,
//!   cursor_value BIGINT,
//!   status TEXT NOT NULL,
//!   batch_size BIGINT NOT NULL,
//!   sub_batch_size BIGINT NOT NULL,
//!   max_batch_size BIGINT,
//!   interval_seconds BIGINT NOT NULL,
//!   total_tuple_count BIGINT,
//!   created_at TIMESTAMPTZ NOT NULL,
//!   updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! The identity columns (`job_class_name`, `table_name`, `column_name`,
//! `job_arguments`) carry a unique index; inserts that collide with an
//! existing definition return nothing instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use super::identity::MigrationIdentity;
use crate::error::{MigrationError, Result};
use crate::state_machine::MigrationStatus;

const MIGRATION_COLUMNS: &str = r#"
    id, job_class_name, table_name, column_name, job_arguments, schema_tag,
    queued_migration_version, batch_class_name, min_value, max_value, cursor_value,
    status, batch_size, sub_batch_size, max_batch_size, interval_seconds,
    total_tuple_count, created_at, updated_at
"#;

/// A batched background migration definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedMigration {
    pub id: i64,
    pub job_class_name: String,
    pub table_name: String,
    pub column_name: String,
    /// Extra arguments passed verbatim to every job invocation
    pub job_arguments: Vec<Value>,
    pub schema_tag: String,
    /// Deployment step that enqueued this migration
    pub queued_migration_version: Option<String>,
    /// Discriminator of the batching strategy
    pub batch_class_name: String,
    pub min_value: i64,
    pub max_value: i64,
    /// Last key covered by a succeeded batch
    pub cursor_value: Option<i64>,
    pub status: MigrationStatus,
    pub batch_size: i64,
    pub sub_batch_size: i64,
    pub max_batch_size: Option<i64>,
    pub interval_seconds: i64,
    /// Cardinality estimate captured at enqueue; advisory only
    pub total_tuple_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New migration for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBatchedMigration {
    pub job_class_name: String,
    pub table_name: String,
    pub column_name: String,
    pub job_arguments: Vec<Value>,
    pub schema_tag: String,
    pub queued_migration_version: Option<String>,
    pub batch_class_name: String,
    pub min_value: i64,
    pub max_value: i64,
    pub status: MigrationStatus,
    pub batch_size: i64,
    pub sub_batch_size: i64,
    pub max_batch_size: Option<i64>,
    pub interval_seconds: i64,
    pub total_tuple_count: Option<i64>,
}

impl NewBatchedMigration {
    pub fn identity(&self) -> MigrationIdentity {
        MigrationIdentity::new(
            self.job_class_name.clone(),
            self.table_name.clone(),
            self.column_name.clone(),
            self.job_arguments.clone(),
        )
    }
}

#[derive(Debug, FromRow)]
struct BatchedMigrationRow {
    id: i64,
    job_class_name: String,
    table_name: String,
    column_name: String,
    job_arguments: Value,
    schema_tag: String,
    queued_migration_version: Option<String>,
    batch_class_name: String,
    min_value: i64,
    max_value: i64,
    cursor_value: Option<i64>,
    status: String,
    batch_size: i64,
    sub_batch_size: i64,
    max_batch_size: Option<i64>,
    interval_seconds: i64,
    total_tuple_count: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BatchedMigrationRow> for BatchedMigration {
    type Error = MigrationError;

    fn try_from(row: BatchedMigrationRow) -> Result<Self> {
        let status = row
            .status
            .parse::<MigrationStatus>()
            .map_err(MigrationError::Database)?;

        let job_arguments = match row.job_arguments {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => {
                return Err(MigrationError::Database(format!(
                    "job_arguments of migration {} is not an array: {other}",
                    row.id
                )))
            }
        };

        Ok(Self {
            id: row.id,
            job_class_name: row.job_class_name,
            table_name: row.table_name,
            column_name: row.column_name,
            job_arguments,
            schema_tag: row.schema_tag,
            queued_migration_version: row.queued_migration_version,
            batch_class_name: row.batch_class_name,
            min_value: row.min_value,
            max_value: row.max_value,
            cursor_value: row.cursor_value,
            status,
            batch_size: row.batch_size,
            sub_batch_size: row.sub_batch_size,
            max_batch_size: row.max_batch_size,
            interval_seconds: row.interval_seconds,
            total_tuple_count: row.total_tuple_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl BatchedMigration {
    pub fn identity(&self) -> MigrationIdentity {
        MigrationIdentity::new(
            self.job_class_name.clone(),
            self.table_name.clone(),
            self.column_name.clone(),
            self.job_arguments.clone(),
        )
    }

    /// Minimum spacing between two batches of this migration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(0) as u64)
    }

    pub fn is_finished(&self) -> bool {
        self.status == MigrationStatus::Finished
    }

    /// First key not yet covered by a succeeded batch
    pub fn next_min_value(&self) -> i64 {
        self.cursor_value
            .map(|cursor| cursor.saturating_add(1))
            .unwrap_or(self.min_value)
    }

    /// Share of the key range already covered, in percent
    pub fn progress_percentage(&self) -> f64 {
        if self.is_finished() {
            return 100.0;
        }

        let Some(cursor) = self.cursor_value else {
            return 0.0;
        };

        let span = (self.max_value - self.min_value + 1) as f64;
        let covered = (cursor.min(self.max_value) - self.min_value + 1).max(0) as f64;

        (covered / span * 100.0).clamp(0.0, 100.0)
    }

    /// Find a migration by primary key
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let query = format!("SELECT {MIGRATION_COLUMNS} FROM batched_background_migrations WHERE id = $1");

        sqlx::query_as::<_, BatchedMigrationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Self::try_from)
            .transpose()
    }

    /// Find a migration by its identity key
    pub async fn find_by_identity(pool: &PgPool, identity: &MigrationIdentity) -> Result<Option<Self>> {
        let query = format!(
            r#"
            SELECT {MIGRATION_COLUMNS}
            FROM batched_background_migrations
            WHERE job_class_name = $1
              AND table_name = $2
              AND column_name = $3
              AND job_arguments = $4
            "#
        );

        sqlx::query_as::<_, BatchedMigrationRow>(&query)
            .bind(&identity.job_class_name)
            .bind(&identity.table_name)
            .bind(&identity.column_name)
            .bind(identity.job_arguments_value())
            .fetch_optional(pool)
            .await?
            .map(Self::try_from)
            .transpose()
    }

    /// Insert a new migration; `None` when the identity key already exists
    pub async fn create(pool: &PgPool, new_migration: NewBatchedMigration) -> Result<Option<Self>> {
        let query = format!(
            r#"
            INSERT INTO batched_background_migrations
            (job_class_name, table_name, column_name, job_arguments, schema_tag,
             queued_migration_version, batch_class_name, min_value, max_value, status,
             batch_size, sub_batch_size, max_batch_size, interval_seconds, total_tuple_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (job_class_name, table_name, column_name, job_arguments) DO NOTHING
            RETURNING {MIGRATION_COLUMNS}
            "#
        );

        sqlx::query_as::<_, BatchedMigrationRow>(&query)
            .bind(&new_migration.job_class_name)
            .bind(&new_migration.table_name)
            .bind(&new_migration.column_name)
            .bind(Value::Array(new_migration.job_arguments.clone()))
            .bind(&new_migration.schema_tag)
            .bind(&new_migration.queued_migration_version)
            .bind(&new_migration.batch_class_name)
            .bind(new_migration.min_value)
            .bind(new_migration.max_value)
            .bind(new_migration.status.as_str())
            .bind(new_migration.batch_size)
            .bind(new_migration.sub_batch_size)
            .bind(new_migration.max_batch_size)
            .bind(new_migration.interval_seconds)
            .bind(new_migration.total_tuple_count)
            .fetch_optional(pool)
            .await?
            .map(Self::try_from)
            .transpose()
    }

    /// Delete the migration matching `identity` together with its jobs
    pub async fn delete_by_identity(pool: &PgPool, identity: &MigrationIdentity) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM batched_background_migrations
            WHERE job_class_name = $1
              AND table_name = $2
              AND column_name = $3
              AND job_arguments = $4
            "#,
        )
        .bind(&identity.job_class_name)
        .bind(&identity.table_name)
        .bind(&identity.column_name)
        .bind(identity.job_arguments_value())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active migrations in id order, optionally restricted to one schema tag
    pub async fn list_active(pool: &PgPool, schema_tag: Option<&str>) -> Result<Vec<Self>> {
        let query = format!(
            r#"
            SELECT {MIGRATION_COLUMNS}
            FROM batched_background_migrations
            WHERE status = 'active'
              AND ($1::TEXT IS NULL OR schema_tag = $1)
            ORDER BY id ASC
            "#
        );

        sqlx::query_as::<_, BatchedMigrationRow>(&query)
            .bind(schema_tag)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Self::try_from)
            .collect()
    }

    pub async fn update_status(pool: &PgPool, id: i64, status: MigrationStatus) -> Result<()> {
        sqlx::query(
            "UPDATE batched_background_migrations SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Move the cursor forward; a stale or regressing value is ignored
    pub async fn advance_cursor(pool: &PgPool, id: i64, cursor_value: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batched_background_migrations
            SET cursor_value = $2, updated_at = NOW()
            WHERE id = $1 AND (cursor_value IS NULL OR cursor_value < $2)
            "#,
        )
        .bind(id)
        .bind(cursor_value)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn update_batch_sizes(
        pool: &PgPool,
        id: i64,
        batch_size: i64,
        sub_batch_size: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE batched_background_migrations
            SET batch_size = $2, sub_batch_size = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(batch_size)
        .bind(sub_batch_size)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn migration() -> BatchedMigration {
        BatchedMigration {
            id: 1,
            job_class_name: "CopyColumn".to_string(),
            table_name: "events".to_string(),
            column_name: "id".to_string(),
            job_arguments: vec![json!("old"), json!("new")],
            schema_tag: "main".to_string(),
            queued_migration_version: Some("20240101000000".to_string()),
            batch_class_name: "PrimaryKeyBatchingStrategy".to_string(),
            min_value: 1,
            max_value: 2_500,
            cursor_value: None,
            status: MigrationStatus::Active,
            batch_size: 1_000,
            sub_batch_size: 100,
            max_batch_size: None,
            interval_seconds: 120,
            total_tuple_count: Some(2_400),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_next_min_value_follows_cursor() {
        let mut migration = migration();
        assert_eq!(migration.next_min_value(), 1);

        migration.cursor_value = Some(1_000);
        assert_eq!(migration.next_min_value(), 1_001);
    }

    #[test]
    fn test_progress_percentage() {
        let mut migration = migration();
        assert_eq!(migration.progress_percentage(), 0.0);

        migration.cursor_value = Some(1_250);
        assert!((migration.progress_percentage() - 50.0).abs() < f64::EPSILON);

        migration.status = MigrationStatus::Finished;
        assert_eq!(migration.progress_percentage(), 100.0);
    }

    #[test]
    fn test_identity_matches_configuration() {
        let migration = migration();
        let identity = migration.identity();
        assert_eq!(identity.job_class_name, "CopyColumn");
        assert_eq!(identity.job_arguments, vec![json!("old"), json!("new")]);
        assert_eq!(migration.interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_row_conversion_rejects_non_array_arguments() {
        let row = BatchedMigrationRow {
            id: 9,
            job_class_name: "CopyColumn".to_string(),
            table_name: "events".to_string(),
            column_name: "id".to_string(),
            job_arguments: json!({"not": "an array"}),
            schema_tag: "main".to_string(),
            queued_migration_version: None,
            batch_class_name: "PrimaryKeyBatchingStrategy".to_string(),
            min_value: 1,
            max_value: 10,
            cursor_value: None,
            status: "active".to_string(),
            batch_size: 10,
            sub_batch_size: 5,
            max_batch_size: None,
            interval_seconds: 120,
            total_tuple_count: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(BatchedMigration::try_from(row).is_err());
    }
}
