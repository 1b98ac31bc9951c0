//! In-process registry fakes and fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blt_common::config::TomlConfig;
use blt_common::db::init_memory_database;
use blt_ingest::config::PipelineConfig;
use blt_ingest::error::{RegistryError, RegistryResult};
use blt_ingest::keys::{Bbl, Bin, SecondaryKeys};
use blt_ingest::pipeline::Pipeline;
use blt_ingest::registries::sqlite::normalize_address;
use blt_ingest::registries::{
    AuditArchive, ComplianceRecord, ComplianceRegistry, EnergyUsageRecord, EnergyUsageRegistry,
    GeocodeMatch, GeocodingService, Registries, StructureRecord, StructureRegistry,
};
use blt_ingest::store::SqliteLeadStore;
use blt_ingest::types::{
    CompliancePathway, EquipmentItem, Era, FuelConsumption, MechanicalAuditRecord, SystemCategory,
    UseCategory,
};
use blt_ingest::utils::retry::RetryPolicy;

pub const EMPIRE: &str = "1008350041";
pub const EMPIRE_BIN: &str = "1015862";
pub const EMPIRE_ADDRESS: &str = "350 5 AVENUE";

pub fn dec(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap()
}

pub fn bbl(text: &str) -> Bbl {
    Bbl::parse(text).unwrap()
}

pub fn bin(text: &str) -> Bin {
    Bin::parse(text).unwrap()
}

#[derive(Default)]
pub struct FakeCompliance {
    pub records: Vec<ComplianceRecord>,
}

#[async_trait]
impl ComplianceRegistry for FakeCompliance {
    async fn lookup_by_key(&self, key: &Bbl) -> RegistryResult<Option<ComplianceRecord>> {
        Ok(self.records.iter().find(|r| &r.key == key).cloned())
    }

    async fn lookup_by_address(&self, address: &str) -> RegistryResult<Option<ComplianceRecord>> {
        let wanted = normalize_address(address);
        Ok(self
            .records
            .iter()
            .find(|r| r.address.as_deref().map(normalize_address).as_deref() == Some(wanted.as_str()))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeGeocoder {
    /// Keyed by normalized address
    pub matches: HashMap<String, GeocodeMatch>,
    pub calls: AtomicU32,
}

impl FakeGeocoder {
    pub fn with(mut self, address: &str, found: GeocodeMatch) -> Self {
        self.matches.insert(normalize_address(address), found);
        self
    }
}

#[async_trait]
impl GeocodingService for FakeGeocoder {
    async fn resolve(&self, address: &str) -> RegistryResult<Option<GeocodeMatch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.matches.get(&normalize_address(address)).cloned())
    }
}

#[derive(Default)]
pub struct FakeStructure {
    pub records: HashMap<Bbl, StructureRecord>,
}

#[async_trait]
impl StructureRegistry for FakeStructure {
    async fn lookup(&self, key: &Bbl) -> RegistryResult<Option<StructureRecord>> {
        Ok(self.records.get(key).cloned())
    }
}

/// Fails with a transient error `failures` times before answering
#[derive(Default)]
pub struct FakeEnergy {
    pub records: HashMap<Bin, EnergyUsageRecord>,
    pub failures: AtomicU32,
    pub calls: AtomicU32,
}

#[async_trait]
impl EnergyUsageRegistry for FakeEnergy {
    async fn lookup(&self, secondary_key: &Bin) -> RegistryResult<Option<EnergyUsageRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RegistryError::Transient("HTTP 503".into()));
        }
        Ok(self.records.get(secondary_key).cloned())
    }
}

pub struct FakeAudits {
    pub era: Era,
    pub records: HashMap<Bbl, MechanicalAuditRecord>,
}

impl FakeAudits {
    pub fn empty(era: Era) -> Self {
        Self {
            era,
            records: HashMap::new(),
        }
    }
}

#[async_trait]
impl AuditArchive for FakeAudits {
    fn era(&self) -> Era {
        self.era
    }

    async fn lookup(&self, key: &Bbl) -> RegistryResult<Option<MechanicalAuditRecord>> {
        Ok(self.records.get(key).cloned())
    }
}

/// The upstream state a test runs against
pub struct World {
    pub compliance: FakeCompliance,
    pub geocoder: FakeGeocoder,
    pub structure: FakeStructure,
    pub energy: FakeEnergy,
    pub newer_audits: FakeAudits,
    pub older_audits: FakeAudits,
}

impl Default for World {
    fn default() -> Self {
        Self {
            compliance: FakeCompliance::default(),
            geocoder: FakeGeocoder::default(),
            structure: FakeStructure::default(),
            energy: FakeEnergy::default(),
            newer_audits: FakeAudits::empty(Era::Y2019To2024),
            older_audits: FakeAudits::empty(Era::Y2012To2018),
        }
    }
}

/// Handles kept so tests can inspect call counts after a run
pub struct Handles {
    pub geocoder: Arc<FakeGeocoder>,
    pub energy: Arc<FakeEnergy>,
}

impl World {
    pub fn into_registries(self) -> (Registries, Handles) {
        let geocoder = Arc::new(self.geocoder);
        let energy = Arc::new(self.energy);
        let registries = Registries {
            compliance: Arc::new(self.compliance),
            geocoder: geocoder.clone(),
            structure: Arc::new(self.structure),
            energy: energy.clone(),
            newer_audits: Arc::new(self.newer_audits),
            older_audits: Arc::new(self.older_audits),
        };
        (registries, Handles { geocoder, energy })
    }
}

pub fn empire_compliance() -> ComplianceRecord {
    ComplianceRecord {
        key: bbl(EMPIRE),
        secondary_keys: SecondaryKeys::parse_packed(EMPIRE_BIN),
        address: Some(EMPIRE_ADDRESS.into()),
        zip_code: Some("10118".into()),
        pathways: vec![CompliancePathway::Cp0Article320Y2024],
    }
}

pub fn empire_structure() -> StructureRecord {
    StructureRecord {
        address: Some("350 5TH AVE".into()),
        zip_code: Some("10118".into()),
        year_built: Some(1930),
        num_floors: Some(dec("102")),
        building_area: Some(dec("2248355")),
        owner_name: Some("ESRT EMPIRE STATE BUILDING, L.L.C.".into()),
    }
}

/// Reference consumption: 10,000,000 kWh, 5,000,000 kBtu gas, no oil or steam
pub fn empire_energy() -> EnergyUsageRecord {
    EnergyUsageRecord {
        matched_key: Some(bin(EMPIRE_BIN)),
        listed_keys: SecondaryKeys::parse_packed(EMPIRE_BIN),
        consumption: FuelConsumption {
            electricity_kwh: Some(dec("10000000")),
            natural_gas_kbtu: Some(dec("5000000")),
            fuel_oil_kbtu: Some(Decimal::ZERO),
            district_steam_kbtu: Some(Decimal::ZERO),
        },
        floor_areas: BTreeMap::from([(UseCategory::new("office"), dec("100000"))]),
        year_built: Some(1931),
        property_type: Some("Office".into()),
        gross_floor_area: Some(dec("2200000")),
        site_eui: Some(dec("88.1")),
        energy_star_score: Some(75),
    }
}

pub fn audit(era: Era, revision_id: i64, plants: &[&str]) -> MechanicalAuditRecord {
    let items = plants
        .iter()
        .enumerate()
        .map(|(index, fuel)| EquipmentItem {
            kind: "Heating Plant".into(),
            instance: index as u32 + 1,
            attributes: BTreeMap::from([("Fuel Type".to_string(), fuel.to_string())]),
        })
        .collect();
    MechanicalAuditRecord {
        era,
        revision_id,
        systems: BTreeMap::from([(SystemCategory::Heating, items)]),
    }
}

/// Fully populated upstream for the reference building
pub fn empire_world() -> World {
    let mut world = World::default();
    world.compliance.records.push(empire_compliance());
    world.structure.records.insert(bbl(EMPIRE), empire_structure());
    world.energy.records.insert(bin(EMPIRE_BIN), empire_energy());
    world
        .newer_audits
        .records
        .insert(bbl(EMPIRE), audit(Era::Y2019To2024, 5, &["Natural Gas"]));
    world
        .older_audits
        .records
        .insert(bbl(EMPIRE), audit(Era::Y2012To2018, 9, &["Natural Gas", "Fuel Oil #2"]));
    world
}

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::from_toml(&TomlConfig::default()).unwrap();
    config.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    };
    config
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<SqliteLeadStore>,
    pub handles: Handles,
}

pub async fn harness(world: World) -> Harness {
    harness_with(world, test_config()).await
}

pub async fn harness_with(world: World, config: PipelineConfig) -> Harness {
    let pool = init_memory_database().await.unwrap();
    let store = Arc::new(SqliteLeadStore::new(pool));
    let (registries, handles) = world.into_registries();
    let pipeline = Arc::new(Pipeline::new(registries, store.clone(), config));
    Harness {
        pipeline,
        store,
        handles,
    }
}
