//! Persistence gateway
//!
//! One lead record per canonical key, stored as independent field groups.
//! `upsert` writes only the groups present in the field map and leaves the
//! rest untouched; a group present with a JSON null is stored as known-absent.

pub mod sqlite;

use async_trait::async_trait;
use blt_common::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::keys::Bbl;
use crate::types::AggregatedLeadRecord;

pub use sqlite::SqliteLeadStore;

/// Independently written parts of a lead record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Identity,
    Characteristics,
    Energy,
    Audit,
    Penalty,
    Narratives,
    DataSource,
}

impl FieldGroup {
    /// Column in `lead_records`
    pub fn column(&self) -> &'static str {
        match self {
            FieldGroup::Identity => "identity",
            FieldGroup::Characteristics => "characteristics",
            FieldGroup::Energy => "energy",
            FieldGroup::Audit => "audit",
            FieldGroup::Penalty => "penalty",
            FieldGroup::Narratives => "narratives",
            FieldGroup::DataSource => "data_source",
        }
    }
}

/// Partial record: the groups one writer owns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(BTreeMap<FieldGroup, Value>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(&mut self, group: FieldGroup, value: &T) -> Result<()> {
        self.0.insert(group, serde_json::to_value(value)?);
        Ok(())
    }

    /// Record the group as known-absent
    pub fn set_absent(&mut self, group: FieldGroup) {
        self.0.insert(group, Value::Null);
    }

    pub fn get(&self, group: FieldGroup) -> Option<&Value> {
        self.0.get(&group)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&FieldGroup, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertReceipt {
    /// The row did not exist before
    pub created: bool,
    /// At least one stored group changed
    pub changed: bool,
}

/// One finished pipeline run, kept for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub run_id: Uuid,
    pub reference: String,
    pub key: Option<Bbl>,
    /// "completed", "cached" or the failure kind
    pub outcome: String,
    pub detail: Option<String>,
    pub finished_at: DateTime<Utc>,
}

pub const OUTCOME_COMPLETED: &str = "completed";
pub const OUTCOME_CACHED: &str = "cached";

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Atomically write the present groups for `key`
    async fn upsert(&self, key: &Bbl, fields: &FieldMap) -> Result<UpsertReceipt>;

    async fn get(&self, key: &Bbl) -> Result<Option<AggregatedLeadRecord>>;

    async fn last_modified(&self, key: &Bbl) -> Result<Option<DateTime<Utc>>>;

    async fn record_run(&self, entry: &RunLogEntry) -> Result<()>;

    /// Finish time of the latest completed run for `key`
    async fn last_successful_run(&self, key: &Bbl) -> Result<Option<DateTime<Utc>>>;

    /// Newest first
    async fn recent_runs(&self, limit: u32, failures_only: bool) -> Result<Vec<RunLogEntry>>;
}
