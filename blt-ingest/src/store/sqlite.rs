//! SQLite lead store
//!
//! Field groups are JSON text columns on `lead_records`. An upsert reads the
//! present columns and writes only when one of them differs, so a rerun
//! with identical data leaves `updated_at` alone.

use async_trait::async_trait;
use blt_common::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{FieldGroup, FieldMap, LeadStore, RunLogEntry, UpsertReceipt, OUTCOME_CACHED, OUTCOME_COMPLETED};
use crate::keys::Bbl;
use crate::types::AggregatedLeadRecord;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

#[derive(Clone)]
pub struct SqliteLeadStore {
    pool: SqlitePool,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {} '{}': {}", column, text, e)))
}

fn decode_group<T: DeserializeOwned>(row: &sqlx::sqlite::SqliteRow, group: FieldGroup) -> Result<Option<T>> {
    let text: Option<String> = row.try_get(group.column())?;
    match text {
        Some(text) => Ok(serde_json::from_str::<Option<T>>(&text)?),
        None => Ok(None),
    }
}

fn decode_run(row: &sqlx::sqlite::SqliteRow) -> Result<RunLogEntry> {
    let run_id: String = row.try_get("run_id")?;
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id '{}': {}", run_id, e)))?;
    let key: Option<String> = row.try_get("bbl")?;
    let finished_at: String = row.try_get("finished_at")?;

    Ok(RunLogEntry {
        run_id,
        reference: row.try_get("reference")?,
        key: key.as_deref().and_then(|k| Bbl::parse(k).ok()),
        outcome: row.try_get("outcome")?,
        detail: row.try_get("detail")?,
        finished_at: parse_timestamp("finished_at", &finished_at)?,
    })
}

impl SqliteLeadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// One read-compare-write transaction
    ///
    /// The first statement is a write, so the transaction holds the write
    /// lock before it reads and waits out `busy_timeout` to get it. A read
    /// first would fail with SQLITE_BUSY as soon as another writer committed.
    async fn upsert_once(&self, key: &str, columns: &[(&'static str, Option<String>)]) -> Result<UpsertReceipt> {
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            "INSERT INTO lead_records (bbl, created_at, updated_at) VALUES (?, ?, ?) ON CONFLICT(bbl) DO NOTHING",
        )
        .bind(key)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let changed = if created {
            true
        } else {
            let select_sql = format!(
                "SELECT {} FROM lead_records WHERE bbl = ?",
                columns.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ")
            );
            let row = sqlx::query(&select_sql)
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

            let mut differs = Vec::new();
            for (index, (column, value)) in columns.iter().enumerate() {
                let stored: Option<String> = row.try_get(index)?;
                if stored != *value {
                    differs.push(*column);
                }
            }
            if !differs.is_empty() {
                debug!(bbl = key, changed = ?differs, "Field groups changed");
            }
            !differs.is_empty()
        };

        if changed {
            let assignments: Vec<String> = columns.iter().map(|(c, _)| format!("{} = ?", c)).collect();
            let update_sql = format!(
                "UPDATE lead_records SET {}, updated_at = ? WHERE bbl = ?",
                assignments.join(", ")
            );
            let mut query = sqlx::query(&update_sql);
            for (_, value) in columns {
                query = query.bind(value.as_deref());
            }
            query.bind(&now).bind(key).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(UpsertReceipt { created, changed })
    }
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn upsert(&self, key: &Bbl, fields: &FieldMap) -> Result<UpsertReceipt> {
        if fields.is_empty() {
            return Err(Error::InvalidInput(format!("Empty field map for {}", key)));
        }

        // Serialize before touching the database. serde_json objects are
        // key-sorted, so equal values always produce equal text.
        let mut columns = Vec::with_capacity(fields.len());
        for (group, value) in fields.groups() {
            let text = if value.is_null() {
                None
            } else {
                Some(serde_json::to_string(value)?)
            };
            columns.push((group.column(), text));
        }

        retry_with_backoff(
            "upsert_lead_record",
            &RetryPolicy::database_lock(),
            Error::is_database_locked,
            || self.upsert_once(key.as_str(), &columns),
        )
        .await
    }

    async fn get(&self, key: &Bbl) -> Result<Option<AggregatedLeadRecord>> {
        let row = sqlx::query(
            r#"
            SELECT bbl, identity, characteristics, energy, audit, penalty,
                   narratives, data_source, created_at, updated_at
            FROM lead_records
            WHERE bbl = ?
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Some(AggregatedLeadRecord {
            key: key.clone(),
            identity: decode_group(&row, FieldGroup::Identity)?,
            characteristics: decode_group(&row, FieldGroup::Characteristics)?,
            energy: decode_group(&row, FieldGroup::Energy)?,
            audit: decode_group(&row, FieldGroup::Audit)?,
            penalty: decode_group(&row, FieldGroup::Penalty)?,
            narratives: decode_group(&row, FieldGroup::Narratives)?,
            data_source: decode_group(&row, FieldGroup::DataSource)?,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        }))
    }

    async fn last_modified(&self, key: &Bbl) -> Result<Option<DateTime<Utc>>> {
        let updated_at: Option<String> =
            sqlx::query_scalar("SELECT updated_at FROM lead_records WHERE bbl = ?")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;

        updated_at
            .map(|text| parse_timestamp("updated_at", &text))
            .transpose()
    }

    async fn record_run(&self, entry: &RunLogEntry) -> Result<()> {
        let run_id = entry.run_id.to_string();
        let key = entry.key.as_ref().map(|k| k.as_str().to_string());
        let finished_at = timestamp(entry.finished_at);

        retry_with_backoff(
            "record_run",
            &RetryPolicy::database_lock(),
            Error::is_database_locked,
            || async {
                sqlx::query(
                    r#"
                    INSERT INTO pipeline_runs (run_id, reference, bbl, outcome, detail, finished_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&run_id)
                .bind(&entry.reference)
                .bind(&key)
                .bind(&entry.outcome)
                .bind(&entry.detail)
                .bind(&finished_at)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
                Ok(())
            },
        )
        .await
    }

    async fn last_successful_run(&self, key: &Bbl) -> Result<Option<DateTime<Utc>>> {
        let finished_at: Option<String> = sqlx::query_scalar(
            "SELECT MAX(finished_at) FROM pipeline_runs WHERE bbl = ? AND outcome = ?",
        )
        .bind(key.as_str())
        .bind(OUTCOME_COMPLETED)
        .fetch_one(&self.pool)
        .await?;

        finished_at
            .map(|text| parse_timestamp("finished_at", &text))
            .transpose()
    }

    async fn recent_runs(&self, limit: u32, failures_only: bool) -> Result<Vec<RunLogEntry>> {
        let rows = if failures_only {
            sqlx::query(
                r#"
                SELECT run_id, reference, bbl, outcome, detail, finished_at
                FROM pipeline_runs
                WHERE outcome NOT IN (?, ?)
                ORDER BY finished_at DESC
                LIMIT ?
                "#,
            )
            .bind(OUTCOME_COMPLETED)
            .bind(OUTCOME_CACHED)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT run_id, reference, bbl, outcome, detail, finished_at
                FROM pipeline_runs
                ORDER BY finished_at DESC
                LIMIT ?
                "#,
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(decode_run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PenaltyResult, Source};
    use blt_common::db::init_memory_database;

    async fn store() -> SqliteLeadStore {
        SqliteLeadStore::new(init_memory_database().await.unwrap())
    }

    fn key() -> Bbl {
        Bbl::parse("1008350041").unwrap()
    }

    fn skipped() -> PenaltyResult {
        PenaltyResult::Skipped {
            reason: "no fuel consumption data".into(),
        }
    }

    #[tokio::test]
    async fn test_first_upsert_creates() {
        let store = store().await;
        let mut fields = FieldMap::new();
        fields.set(FieldGroup::Penalty, &skipped()).unwrap();

        let receipt = store.upsert(&key(), &fields).await.unwrap();
        assert!(receipt.created);
        assert!(receipt.changed);

        let record = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(record.penalty, Some(skipped()));
        assert!(record.identity.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[tokio::test]
    async fn test_identical_upsert_leaves_updated_at() {
        let store = store().await;
        let mut fields = FieldMap::new();
        fields.set(FieldGroup::DataSource, &"compliance+geocoding").unwrap();

        store.upsert(&key(), &fields).await.unwrap();
        let before = store.last_modified(&key()).await.unwrap().unwrap();

        let receipt = store.upsert(&key(), &fields).await.unwrap();
        assert!(!receipt.created);
        assert!(!receipt.changed);
        assert_eq!(store.last_modified(&key()).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_absent_groups_are_untouched() {
        let store = store().await;
        let mut first = FieldMap::new();
        first.set(FieldGroup::DataSource, &"energy_usage").unwrap();
        first.set(FieldGroup::Penalty, &skipped()).unwrap();
        store.upsert(&key(), &first).await.unwrap();

        let mut second = FieldMap::new();
        second.set(FieldGroup::DataSource, &Source::Manual.as_str()).unwrap();
        let receipt = store.upsert(&key(), &second).await.unwrap();
        assert!(receipt.changed);

        let record = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(record.data_source.as_deref(), Some("manual"));
        assert_eq!(record.penalty, Some(skipped()));
    }

    #[tokio::test]
    async fn test_known_absent_clears_group() {
        let store = store().await;
        let mut first = FieldMap::new();
        first.set(FieldGroup::Penalty, &skipped()).unwrap();
        store.upsert(&key(), &first).await.unwrap();

        let mut second = FieldMap::new();
        second.set_absent(FieldGroup::Penalty);
        assert!(store.upsert(&key(), &second).await.unwrap().changed);
        assert!(store.get(&key()).await.unwrap().unwrap().penalty.is_none());
    }

    #[tokio::test]
    async fn test_empty_field_map_rejected() {
        let store = store().await;
        assert!(store.upsert(&key(), &FieldMap::new()).await.is_err());
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_log() {
        let store = store().await;
        let earlier = Utc::now() - chrono::Duration::hours(2);
        let later = Utc::now();

        for (outcome, finished_at) in [(OUTCOME_COMPLETED, earlier), ("not_found", later)] {
            store
                .record_run(&RunLogEntry {
                    run_id: Uuid::new_v4(),
                    reference: key().to_string(),
                    key: Some(key()),
                    outcome: outcome.to_string(),
                    detail: None,
                    finished_at,
                })
                .await
                .unwrap();
        }

        let last = store.last_successful_run(&key()).await.unwrap().unwrap();
        assert_eq!(timestamp(last), timestamp(earlier));

        let failures = store.recent_runs(10, true).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].outcome, "not_found");
        assert_eq!(store.recent_runs(10, false).await.unwrap().len(), 2);
    }
}
