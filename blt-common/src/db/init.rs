//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to date.
//! All statements are idempotent so every process start may call this.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on another writer's lock
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the on-disk database and apply the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Concurrent building runs each hold a connection while upserting.
    // WAL and busy_timeout are per connection, so every pooled one gets them.
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS)),
        )
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema (tests, dry runs)
pub async fn init_memory_database() -> Result<SqlitePool> {
    // Each in-memory connection is its own database, so pin the pool to one
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_tables(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create every table at its version-1 shape
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_lead_records_table(pool).await?;
    create_compliance_buildings_table(pool).await?;
    create_mechanical_audits_table(pool).await?;
    create_pipeline_runs_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// One row per canonical key; each field group is a JSON text column
async fn create_lead_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lead_records (
            bbl TEXT PRIMARY KEY,
            identity TEXT,
            characteristics TEXT,
            energy TEXT,
            audit TEXT,
            penalty TEXT,
            data_source TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_lead_records_updated ON lead_records(updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_compliance_buildings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS compliance_buildings (
            bbl TEXT PRIMARY KEY,
            preliminary_bin TEXT,
            address TEXT,
            zip_code TEXT,
            cp0_article_320_2024 INTEGER NOT NULL DEFAULT 0,
            cp1_article_320_2026 INTEGER NOT NULL DEFAULT 0,
            cp2_article_320_2035 INTEGER NOT NULL DEFAULT 0,
            cp3_article_321_onetime INTEGER NOT NULL DEFAULT 0,
            cp4_city_portfolio INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_compliance_address ON compliance_buildings(UPPER(address))",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw audit rows from both reporting windows, told apart by `reporting_period`
async fn create_mechanical_audits_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mechanical_audits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bbl TEXT NOT NULL,
            audit_template_id INTEGER NOT NULL,
            reporting_period TEXT NOT NULL,
            raw_data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_mechanical_audits_lookup
        ON mechanical_audits(bbl, reporting_period, audit_template_id DESC)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pipeline_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            reference TEXT NOT NULL,
            bbl TEXT,
            outcome TEXT NOT NULL,
            detail TEXT,
            finished_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_bbl ON pipeline_runs(bbl, finished_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
