//! Registry ports
//!
//! Each upstream registry is an injected trait object. Adapters parse their
//! payloads into the typed records below at the boundary, so pipeline stages
//! never see raw maps. A registry answering "no such record" returns
//! `Ok(None)`; only transport or contract failures are errors.

pub mod equipment;
pub mod geosearch;
pub mod http;
pub mod socrata;
pub mod sqlite;

use async_trait::async_trait;
use blt_common::config::RegistryConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;

use crate::error::{PipelineError, RegistryError, RegistryResult};
use crate::keys::{Bbl, Bin, SecondaryKeys};
use crate::types::{CompliancePathway, Era, FuelConsumption, MechanicalAuditRecord, UseCategory};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

/// Compliance registry row: the authoritative identity source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub key: Bbl,
    pub secondary_keys: SecondaryKeys,
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub pathways: Vec<CompliancePathway>,
}

/// Best geocoder candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeMatch {
    pub candidate_key: Option<Bbl>,
    pub secondary_key: Option<Bin>,
    pub label: Option<String>,
    pub confidence: f64,
}

/// Tax-lot structure data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub year_built: Option<i32>,
    pub num_floors: Option<Decimal>,
    pub building_area: Option<Decimal>,
    pub owner_name: Option<String>,
}

/// Latest benchmarking submission for a secondary key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyUsageRecord {
    /// The secondary key that matched, after unpacking the row's field
    pub matched_key: Option<Bin>,
    /// Every secondary key the row lists
    pub listed_keys: SecondaryKeys,
    pub consumption: FuelConsumption,
    pub floor_areas: BTreeMap<UseCategory, Decimal>,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub gross_floor_area: Option<Decimal>,
    pub site_eui: Option<Decimal>,
    pub energy_star_score: Option<i32>,
}

#[async_trait]
pub trait ComplianceRegistry: Send + Sync {
    async fn lookup_by_key(&self, key: &Bbl) -> RegistryResult<Option<ComplianceRecord>>;

    /// Case- and whitespace-insensitive exact address match
    async fn lookup_by_address(&self, address: &str) -> RegistryResult<Option<ComplianceRecord>>;
}

#[async_trait]
pub trait GeocodingService: Send + Sync {
    async fn resolve(&self, address: &str) -> RegistryResult<Option<GeocodeMatch>>;
}

#[async_trait]
pub trait StructureRegistry: Send + Sync {
    async fn lookup(&self, key: &Bbl) -> RegistryResult<Option<StructureRecord>>;
}

/// Energy-usage lookups match the secondary key as a member of the row's
/// packed key field (contains match) and return the latest submission.
#[async_trait]
pub trait EnergyUsageRegistry: Send + Sync {
    async fn lookup(&self, secondary_key: &Bin) -> RegistryResult<Option<EnergyUsageRecord>>;
}

/// One mechanical-audit reporting window
#[async_trait]
pub trait AuditArchive: Send + Sync {
    fn era(&self) -> Era;

    /// Highest revision recorded in this window for the key
    async fn lookup(&self, key: &Bbl) -> RegistryResult<Option<MechanicalAuditRecord>>;
}

/// The full set of injected registries
#[derive(Clone)]
pub struct Registries {
    pub compliance: Arc<dyn ComplianceRegistry>,
    pub geocoder: Arc<dyn GeocodingService>,
    pub structure: Arc<dyn StructureRegistry>,
    pub energy: Arc<dyn EnergyUsageRegistry>,
    pub newer_audits: Arc<dyn AuditArchive>,
    pub older_audits: Arc<dyn AuditArchive>,
}

impl Registries {
    /// HTTP adapters for the public registries, SQLite for the seeded ones
    pub fn connect(
        pool: SqlitePool,
        config: &RegistryConfig,
        app_token: Option<String>,
    ) -> RegistryResult<Self> {
        let socrata_http = http::HttpRegistryClient::new(config, app_token)?;
        // The token belongs to the open-data portal only
        let geosearch_http = http::HttpRegistryClient::new(config, None)?;

        Ok(Self {
            compliance: Arc::new(sqlite::SqliteComplianceRegistry::new(pool.clone())),
            geocoder: Arc::new(geosearch::GeoSearchClient::new(
                geosearch_http,
                config.geosearch_url.clone(),
            )),
            structure: Arc::new(socrata::SocrataStructureRegistry::new(
                socrata_http.clone(),
                &config.socrata_base_url,
                &config.structure_dataset,
            )),
            energy: Arc::new(socrata::SocrataEnergyRegistry::new(
                socrata_http,
                &config.socrata_base_url,
                &config.energy_dataset,
            )),
            newer_audits: Arc::new(sqlite::SqliteAuditArchive::new(pool.clone(), Era::Y2019To2024)),
            older_audits: Arc::new(sqlite::SqliteAuditArchive::new(pool, Era::Y2012To2018)),
        })
    }
}

/// Registry names used in errors and logs
pub mod names {
    pub const COMPLIANCE: &str = "compliance registry";
    pub const GEOCODER: &str = "geocoding service";
    pub const STRUCTURE: &str = "structure registry";
    pub const ENERGY: &str = "energy usage registry";
    pub const AUDIT: &str = "audit archive";
}

/// Call a registry, retrying transient failures, and escalate what remains
pub async fn call_with_retry<T, F, Fut>(
    registry: &'static str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RegistryResult<T>>,
{
    retry_with_backoff(registry, policy, RegistryError::is_transient, operation)
        .await
        .map_err(|e| e.into_pipeline(registry))
}
