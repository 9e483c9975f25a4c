//! Postgres-backed store tests.
//!
//! These need a live database: run with
//! `DATABASE_URL=postgres://... cargo test --test postgres_store_tests -- --ignored`.

mod common;

use std::sync::Arc;

use batched_migrations::config::{DatabaseConfig, MigrationsConfig};
use batched_migrations::database::{DatabaseConnection, MigrationStore, PgMigrationStore, TableIntrospector};
use batched_migrations::models::NewBatchedJob;
use batched_migrations::orchestration::{EnqueueRequest, MigrationContext, MigrationEngine};
use batched_migrations::registry::JobRegistry;
use batched_migrations::{MigrationError, MigrationStatus};
use chrono::Utc;
use common::*;
use uuid::Uuid;

async fn connect() -> DatabaseConnection {
    let connection = DatabaseConnection::connect(&DatabaseConfig::default())
        .await
        .expect("DATABASE_URL must point at a reachable database");
    connection.run_migrations().await.expect("engine migrations");
    connection
}

/// Fresh table `name` holding ids `1..=rows`
async fn create_table(connection: &DatabaseConnection, name: &str, rows: i64) {
    sqlx::query(&format!("CREATE TABLE {name} (id BIGINT PRIMARY KEY)"))
        .execute(connection.pool())
        .await
        .expect("create table");
    sqlx::query(&format!("INSERT INTO {name} (id) SELECT generate_series(1, $1)"))
        .bind(rows)
        .execute(connection.pool())
        .await
        .expect("seed table");
}

fn unique_table() -> String {
    format!("bbm_test_{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_enqueue_is_idempotent_in_postgres() {
    let connection = connect().await;
    let table = unique_table();
    create_table(&connection, &table, 2_500).await;

    let jobs = Arc::new(JobRegistry::new());
    jobs.register(JOB_CLASS, Arc::new(RecordingJob::new()));
    let engine = MigrationEngine::with_pool(connection.pool().clone(), jobs, MigrationsConfig::default());
    let ctx = MigrationContext::default();
    let request = EnqueueRequest::new(JOB_CLASS, &table, COLUMN, INTERVAL).with_batch_size(1_000);

    let first = engine.registry().enqueue(&ctx, request.clone()).await.unwrap();
    let second = engine.registry().enqueue(&ctx, request).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.max_value, 2_500);
    assert_eq!(first.status, MigrationStatus::Active);

    assert!(engine.registry().delete(&first.identity()).await.unwrap());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_finalize_in_postgres() {
    let connection = connect().await;
    let table = unique_table();
    create_table(&connection, &table, 2_500).await;

    let job = Arc::new(RecordingJob::new());
    let jobs = Arc::new(JobRegistry::new());
    jobs.register(JOB_CLASS, job.clone());
    let engine = MigrationEngine::with_pool(connection.pool().clone(), jobs, MigrationsConfig::default());
    let ctx = MigrationContext::default();

    let migration = engine
        .registry()
        .enqueue(&ctx, EnqueueRequest::new(JOB_CLASS, &table, COLUMN, INTERVAL).with_batch_size(1_000))
        .await
        .unwrap();
    let finalized = engine.finalizer().finalize(&ctx, &migration.identity()).await.unwrap();

    assert_eq!(finalized.status, MigrationStatus::Finished);
    assert_eq!(job.ranges(), vec![(1, 1_000), (1_001, 2_000), (2_001, 2_500)]);

    engine.registry().delete(&migration.identity()).await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_one_running_job_per_migration_index() {
    let connection = connect().await;
    let table = unique_table();
    create_table(&connection, &table, 10).await;

    let jobs = Arc::new(JobRegistry::new());
    jobs.register(JOB_CLASS, Arc::new(RecordingJob::new()));
    let engine = MigrationEngine::with_pool(connection.pool().clone(), jobs, MigrationsConfig::default());
    let migration = engine
        .registry()
        .enqueue(
            &MigrationContext::default(),
            EnqueueRequest::new(JOB_CLASS, &table, COLUMN, INTERVAL),
        )
        .await
        .unwrap();

    let store = PgMigrationStore::new(connection.pool().clone());
    let new_job = NewBatchedJob {
        batched_migration_id: migration.id,
        min_value: 1,
        max_value: 10,
        batch_size: 10,
        sub_batch_size: 10,
        attempts: 1,
        started_at: Utc::now(),
    };
    store.create_job(new_job.clone()).await.unwrap();
    let err = store.create_job(new_job).await.unwrap_err();
    assert!(matches!(err, MigrationError::ConcurrentBatch { .. }));

    engine.registry().delete(&migration.identity()).await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_introspection_queries() {
    let connection = connect().await;
    let table = unique_table();
    create_table(&connection, &table, 100).await;
    let store = PgMigrationStore::new(connection.pool().clone());

    assert_eq!(store.max_value(&table, COLUMN).await.unwrap(), Some(100));
    assert_eq!(store.next_key(&table, COLUMN, 42).await.unwrap(), Some(42));
    assert_eq!(store.key_at_offset(&table, COLUMN, 42, 10).await.unwrap(), Some(52));
    assert_eq!(store.key_at_offset(&table, COLUMN, 95, 10).await.unwrap(), None);
    assert!(store.max_value("bbm_missing_table", COLUMN).await.is_err());
}
