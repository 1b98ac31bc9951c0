//! Database initialization and migration tests

use blt_common::db::migrations::{get_schema_version, has_column};
use blt_common::db::{
    init_database, init_memory_database, run_migrations, BUSY_TIMEOUT_MS, CURRENT_SCHEMA_VERSION,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_init_creates_database_file_and_tables() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sub").join("blt.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    for table in [
        "lead_records",
        "compliance_buildings",
        "mechanical_audits",
        "pipeline_runs",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} should exist", table);
    }

    assert!(has_column(&pool, "lead_records", "narratives").await.unwrap());
    assert_eq!(
        get_schema_version(&pool).await.unwrap(),
        CURRENT_SCHEMA_VERSION
    );
}

#[tokio::test]
async fn test_reopen_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("blt.db");

    let pool = init_database(&db_path).await.unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(versions, CURRENT_SCHEMA_VERSION as i64);
}

#[tokio::test]
async fn test_every_pooled_connection_waits_for_locks() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("blt.db")).await.unwrap();

    // Hold several at once so the pool cannot hand back the same one
    let mut held = Vec::new();
    for _ in 0..4 {
        let mut conn = pool.acquire().await.unwrap();
        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(timeout, BUSY_TIMEOUT_MS as i64);

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(mode, "wal");
        held.push(conn);
    }
}

#[tokio::test]
async fn test_migrations_run_twice_without_error() {
    let pool = init_memory_database().await.unwrap();
    run_migrations(&pool).await.unwrap();
    run_migrations(&pool).await.unwrap();
    assert!(has_column(&pool, "lead_records", "narratives").await.unwrap());
}
