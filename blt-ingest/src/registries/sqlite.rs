//! SQLite-backed registries: compliance list and mechanical-audit archives
//!
//! Both are bulk datasets loaded by the seed loaders (see `crate::seed`) and
//! queried locally.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::equipment::parse_equipment;
use super::{AuditArchive, ComplianceRecord, ComplianceRegistry};
use crate::error::{RegistryError, RegistryResult};
use crate::keys::{Bbl, SecondaryKeys};
use crate::types::{CompliancePathway, Era, MechanicalAuditRecord};

const COMPLIANCE_COLUMNS: &str = r#"
    bbl, preliminary_bin, address, zip_code,
    cp0_article_320_2024, cp1_article_320_2026, cp2_article_320_2035,
    cp3_article_321_onetime, cp4_city_portfolio
"#;

/// Uppercase with single spaces, as stored addresses are compared
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn compliance_from_row(row: &sqlx::sqlite::SqliteRow) -> RegistryResult<ComplianceRecord> {
    let bbl: String = row.try_get("bbl")?;
    let key = Bbl::parse(&bbl)
        .map_err(|e| RegistryError::Malformed(format!("compliance row key {}: {}", bbl, e)))?;

    let bins: Option<String> = row.try_get("preliminary_bin")?;

    let flags = [
        ("cp0_article_320_2024", CompliancePathway::Cp0Article320Y2024),
        ("cp1_article_320_2026", CompliancePathway::Cp1Article320Y2026),
        ("cp2_article_320_2035", CompliancePathway::Cp2Article320Y2035),
        ("cp3_article_321_onetime", CompliancePathway::Cp3Article321OneTime),
        ("cp4_city_portfolio", CompliancePathway::Cp4CityPortfolio),
    ];
    let mut pathways = Vec::new();
    for (column, pathway) in flags {
        let flag: i64 = row.try_get(column)?;
        if flag != 0 {
            pathways.push(pathway);
        }
    }

    Ok(ComplianceRecord {
        key,
        secondary_keys: bins
            .map(|b| SecondaryKeys::parse_packed(&b))
            .unwrap_or_default(),
        address: row.try_get("address")?,
        zip_code: row.try_get("zip_code")?,
        pathways,
    })
}

/// Compliance registry over the `compliance_buildings` table
pub struct SqliteComplianceRegistry {
    pool: SqlitePool,
}

impl SqliteComplianceRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComplianceRegistry for SqliteComplianceRegistry {
    async fn lookup_by_key(&self, key: &Bbl) -> RegistryResult<Option<ComplianceRecord>> {
        let sql = format!(
            "SELECT {} FROM compliance_buildings WHERE bbl = ?",
            COMPLIANCE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(compliance_from_row).transpose()
    }

    async fn lookup_by_address(&self, address: &str) -> RegistryResult<Option<ComplianceRecord>> {
        let sql = format!(
            "SELECT {} FROM compliance_buildings WHERE UPPER(address) = ? ORDER BY bbl LIMIT 1",
            COMPLIANCE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(normalize_address(address))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(compliance_from_row).transpose()
    }
}

/// One reporting window of the `mechanical_audits` table
pub struct SqliteAuditArchive {
    pool: SqlitePool,
    era: Era,
}

impl SqliteAuditArchive {
    pub fn new(pool: SqlitePool, era: Era) -> Self {
        Self { pool, era }
    }
}

#[async_trait]
impl AuditArchive for SqliteAuditArchive {
    fn era(&self) -> Era {
        self.era
    }

    async fn lookup(&self, key: &Bbl) -> RegistryResult<Option<MechanicalAuditRecord>> {
        let row = sqlx::query(
            r#"
            SELECT audit_template_id, raw_data
            FROM mechanical_audits
            WHERE bbl = ? AND reporting_period = ?
            ORDER BY audit_template_id DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .bind(self.era.label())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let revision_id: i64 = row.try_get("audit_template_id")?;
        let raw_data: String = row.try_get("raw_data")?;

        let raw: serde_json::Value = serde_json::from_str(&raw_data).map_err(|e| {
            RegistryError::Malformed(format!("audit {} raw data: {}", revision_id, e))
        })?;
        let object = raw.as_object().ok_or_else(|| {
            RegistryError::Malformed(format!("audit {} raw data is not an object", revision_id))
        })?;

        Ok(Some(MechanicalAuditRecord {
            era: self.era,
            revision_id,
            systems: parse_equipment(object),
        }))
    }
}
