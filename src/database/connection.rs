use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Open a pool from configuration (`database.url` or `DATABASE_URL`)
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let database_url = config.database_url()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&database_url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to batched migration store"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the engine's own schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        super::migrations::run(&self.pool).await
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
