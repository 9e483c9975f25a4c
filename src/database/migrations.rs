//! # Schema Migrations
//!
//! The engine's own tables (`batched_background_migrations` and
//! `batched_background_migration_jobs`) are created by the SQL files under
//! `migrations/`, embedded at compile time and applied with SQLx's migrator.
//! The migrator takes a Postgres advisory lock, so concurrent callers are safe.

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all pending schema migrations
pub async fn run(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "Batched migration schema is up to date"
    );
    Ok(())
}
