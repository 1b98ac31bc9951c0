//! Lead store against an on-disk database shared by many writers

use std::collections::HashSet;
use std::sync::Arc;

use blt_common::db::init_database;
use blt_ingest::keys::Bbl;
use blt_ingest::store::{FieldGroup, FieldMap, LeadStore, SqliteLeadStore};
use tempfile::TempDir;

const WRITERS: usize = 100;

async fn file_store(temp_dir: &TempDir) -> Arc<SqliteLeadStore> {
    let pool = init_database(&temp_dir.path().join("blt.db")).await.unwrap();
    Arc::new(SqliteLeadStore::new(pool))
}

fn data_source(text: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.set(FieldGroup::DataSource, &text).unwrap();
    fields
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_upserts_for_distinct_keys_all_land() {
    let temp_dir = TempDir::new().unwrap();
    let store = file_store(&temp_dir).await;

    let mut tasks = Vec::new();
    for i in 0..WRITERS {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let key = Bbl::parse(&format!("1{:05}0001", i + 1)).unwrap();
            store.upsert(&key, &data_source("compliance")).await
        }));
    }

    for task in tasks {
        let receipt = task.await.unwrap().unwrap();
        assert!(receipt.created);
    }

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lead_records")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, WRITERS as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_upserts_for_one_key_serialize() {
    let temp_dir = TempDir::new().unwrap();
    let store = file_store(&temp_dir).await;
    let key = Bbl::parse("1008350041").unwrap();

    let mut tasks = Vec::new();
    for i in 0..WRITERS {
        let store = store.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            store.upsert(&key, &data_source(&format!("writer {}", i))).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        let receipt = task.await.unwrap().unwrap();
        assert!(receipt.changed);
        if receipt.created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let written: HashSet<String> = (0..WRITERS).map(|i| format!("writer {}", i)).collect();
    let record = store.get(&key).await.unwrap().unwrap();
    assert!(written.contains(record.data_source.as_deref().unwrap()));
}
