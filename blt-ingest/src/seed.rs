//! Seed loaders for the locally held registries
//!
//! The compliance list is upserted row by row. Each audit window is replaced
//! wholesale: every row for the era is deleted and the file reinserted in one
//! transaction, so a reload never mixes two releases.

use blt_common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::keys::{Bbl, SecondaryKeys};
use crate::parse::{decimal_from_text, is_null_marker};
use crate::types::Era;

/// Rows written and rows rejected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub loaded: usize,
    pub skipped: usize,
}

fn csv_error(err: csv::Error) -> Error {
    Error::InvalidInput(format!("CSV read failed: {}", err))
}

fn open(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Open {} failed: {}", path.display(), e),
        ))
    })
}

fn read_headers<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<String>> {
    Ok(reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect())
}

fn column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|name| headers.iter().position(|h| h == name))
}

fn required_column(headers: &[String], candidates: &[&str]) -> Result<usize> {
    column(headers, candidates)
        .ok_or_else(|| Error::InvalidInput(format!("CSV is missing column {}", candidates.join(" or "))))
}

/// Non-placeholder trimmed cell text
fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<String> {
    let text = record.get(index?)?.trim();
    (!is_null_marker(text)).then(|| text.to_string())
}

/// Zip codes arrive as "10001", "10001.0" or junk
fn clean_zip(text: &str) -> Option<String> {
    let value = decimal_from_text(text)?;
    if value.fract() != rust_decimal::Decimal::ZERO || value.is_sign_negative() {
        return None;
    }
    Some(value.trunc().to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pathway columns are matched by prefix; the source headers carry long labels
const PATHWAY_PREFIXES: [(&str, &str); 5] = [
    ("CP0", "cp0_article_320_2024"),
    ("CP1", "cp1_article_320_2026"),
    ("CP2", "cp2_article_320_2035"),
    ("CP3", "cp3_article_321_onetime"),
    ("CP4", "cp4_city_portfolio"),
];

/// Load the covered-buildings list into `compliance_buildings`
pub async fn load_compliance<R: Read>(pool: &SqlitePool, source: R) -> Result<SeedSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);
    let headers = read_headers(&mut reader)?;

    let bbl_idx = required_column(&headers, &["BBL"])?;
    let bin_idx = column(&headers, &["Preliminary BIN", "BIN"]);
    let address_idx = column(&headers, &["Address"]);
    let zip_idx = column(&headers, &["Zip Code", "Postcode"]);
    let pathway_idx: Vec<Option<usize>> = PATHWAY_PREFIXES
        .iter()
        .map(|(prefix, _)| headers.iter().position(|h| h.starts_with(prefix)))
        .collect();

    let mut summary = SeedSummary::default();
    let mut tx = pool.begin().await?;

    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;

        let key = match cell(&record, Some(bbl_idx)).as_deref().map(Bbl::parse) {
            Some(Ok(key)) => key,
            Some(Err(err)) => {
                warn!(line = line + 2, error = %err, "Skipping compliance row with bad BBL");
                summary.skipped += 1;
                continue;
            }
            None => {
                summary.skipped += 1;
                continue;
            }
        };

        let bins = cell(&record, bin_idx).map(|packed| {
            SecondaryKeys::parse_packed(&packed)
                .iter()
                .map(|b| b.as_str())
                .collect::<Vec<_>>()
                .join(",")
        });
        let address = cell(&record, address_idx).map(|a| collapse_whitespace(&a));
        let zip_code = cell(&record, zip_idx).and_then(|z| clean_zip(&z));
        let flags: Vec<bool> = pathway_idx
            .iter()
            .map(|idx| {
                cell(&record, *idx)
                    .map(|v| v.eq_ignore_ascii_case("x"))
                    .unwrap_or(false)
            })
            .collect();

        sqlx::query(
            r#"
            INSERT INTO compliance_buildings (
                bbl, preliminary_bin, address, zip_code,
                cp0_article_320_2024, cp1_article_320_2026, cp2_article_320_2035,
                cp3_article_321_onetime, cp4_city_portfolio
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bbl) DO UPDATE SET
                preliminary_bin = excluded.preliminary_bin,
                address = excluded.address,
                zip_code = excluded.zip_code,
                cp0_article_320_2024 = excluded.cp0_article_320_2024,
                cp1_article_320_2026 = excluded.cp1_article_320_2026,
                cp2_article_320_2035 = excluded.cp2_article_320_2035,
                cp3_article_321_onetime = excluded.cp3_article_321_onetime,
                cp4_city_portfolio = excluded.cp4_city_portfolio
            "#,
        )
        .bind(key.as_str())
        .bind(&bins)
        .bind(&address)
        .bind(&zip_code)
        .bind(flags[0])
        .bind(flags[1])
        .bind(flags[2])
        .bind(flags[3])
        .bind(flags[4])
        .execute(&mut *tx)
        .await?;

        summary.loaded += 1;
    }

    tx.commit().await?;
    info!(loaded = summary.loaded, skipped = summary.skipped, "Compliance list loaded");
    Ok(summary)
}

pub async fn load_compliance_csv(pool: &SqlitePool, path: &Path) -> Result<SeedSummary> {
    info!("Loading compliance list from {}", path.display());
    load_compliance(pool, open(path)?).await
}

/// Replace one era of `mechanical_audits` with the rows of `source`
pub async fn load_audits<R: Read>(pool: &SqlitePool, source: R, era: Era) -> Result<SeedSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);
    let headers = read_headers(&mut reader)?;

    let bbl_idx = required_column(&headers, &["Borough/Block/Lot (BBL)", "BBL"])?;
    let audit_idx = column(&headers, &["Audit Template ID", "audit_template_id"]);

    // Parse everything before the delete so a bad file leaves the era intact
    let mut rows = Vec::new();
    let mut summary = SeedSummary::default();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;

        let key = match cell(&record, Some(bbl_idx)).as_deref().map(Bbl::parse) {
            Some(Ok(key)) => key,
            _ => {
                warn!(line = line + 2, "Skipping audit row without a valid BBL");
                summary.skipped += 1;
                continue;
            }
        };

        let revision_id = cell(&record, audit_idx)
            .and_then(|text| decimal_from_text(&text))
            .and_then(|d| rust_decimal::prelude::ToPrimitive::to_i64(&d.trunc()))
            .unwrap_or(0);

        let raw: Map<String, Value> = headers
            .iter()
            .enumerate()
            .filter_map(|(index, header)| {
                cell(&record, Some(index)).map(|text| (header.clone(), Value::String(text)))
            })
            .collect();

        rows.push((key, revision_id, serde_json::to_string(&Value::Object(raw))?));
    }

    let mut tx = pool.begin().await?;
    let cleared = sqlx::query("DELETE FROM mechanical_audits WHERE reporting_period = ?")
        .bind(era.label())
        .execute(&mut *tx)
        .await?
        .rows_affected();

    for (key, revision_id, raw_data) in &rows {
        sqlx::query(
            r#"
            INSERT INTO mechanical_audits (bbl, audit_template_id, reporting_period, raw_data)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key.as_str())
        .bind(revision_id)
        .bind(era.label())
        .bind(raw_data)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    summary.loaded = rows.len();
    info!(
        era = %era,
        cleared,
        loaded = summary.loaded,
        skipped = summary.skipped,
        "Audit window replaced"
    );
    Ok(summary)
}

pub async fn load_audits_csv(pool: &SqlitePool, path: &Path, era: Era) -> Result<SeedSummary> {
    info!("Loading {} audits from {}", era, path.display());
    load_audits(pool, open(path)?, era).await
}
