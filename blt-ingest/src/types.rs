//! Domain types shared across pipeline stages

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::keys::{Bbl, SecondaryKeys};

/// Upstream source of a merged value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    ComplianceRegistry,
    StructureRegistry,
    GeocodingService,
    EnergyUsageRegistry,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ComplianceRegistry => "compliance_registry",
            Source::StructureRegistry => "structure_registry",
            Source::GeocodingService => "geocoding_service",
            Source::EnergyUsageRegistry => "energy_usage_registry",
            Source::Manual => "manual",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field provenance: field name → supplying source
pub type Provenance = BTreeMap<String, Source>;

/// Regulatory compliance pathway assigned in the compliance registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompliancePathway {
    #[serde(rename = "CP0")]
    Cp0Article320Y2024,
    #[serde(rename = "CP1")]
    Cp1Article320Y2026,
    #[serde(rename = "CP2")]
    Cp2Article320Y2035,
    #[serde(rename = "CP3")]
    Cp3Article321OneTime,
    #[serde(rename = "CP4")]
    Cp4CityPortfolio,
}

impl CompliancePathway {
    pub fn label(&self) -> &'static str {
        match self {
            CompliancePathway::Cp0Article320Y2024 => "CP0 (2024)",
            CompliancePathway::Cp1Article320Y2026 => "CP1 (2026)",
            CompliancePathway::Cp2Article320Y2035 => "CP2 (2035)",
            CompliancePathway::Cp3Article321OneTime => "CP3 (One-Time)",
            CompliancePathway::Cp4CityPortfolio => "CP4 (City Portfolio)",
        }
    }

    /// Comma-joined labels, or "None assigned"
    pub fn display_list(pathways: &[CompliancePathway]) -> String {
        if pathways.is_empty() {
            return "None assigned".to_string();
        }
        pathways
            .iter()
            .map(|p| p.label())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Resolved identity of one regulated building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingIdentity {
    pub key: Bbl,
    pub secondary_keys: SecondaryKeys,
    /// Compliance registry address whenever that registry knows the building
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub borough: String,
    pub alias_addresses: Vec<String>,
    /// Set only when the geocoder took part in resolution
    pub geocode_confidence: Option<f64>,
    /// True when the compliance registry lists the building
    pub covered: bool,
    pub compliance_pathways: Vec<CompliancePathway>,
    pub provenance: Provenance,
}

/// Building characteristics after source-priority merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingCharacteristics {
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub gross_floor_area: Option<Decimal>,
    pub num_floors: Option<Decimal>,
    pub owner_name: Option<String>,
    pub site_eui: Option<Decimal>,
    pub energy_star_score: Option<i32>,
    pub provenance: Provenance,
}

/// Fuel types carried by the emissions coefficient tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fuel {
    Electricity,
    NaturalGas,
    FuelOil,
    DistrictSteam,
}

impl Fuel {
    pub const ALL: [Fuel; 4] = [
        Fuel::Electricity,
        Fuel::NaturalGas,
        Fuel::FuelOil,
        Fuel::DistrictSteam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Fuel::Electricity => "electricity",
            Fuel::NaturalGas => "natural_gas",
            Fuel::FuelOil => "fuel_oil",
            Fuel::DistrictSteam => "district_steam",
        }
    }

    pub fn parse(name: &str) -> Option<Fuel> {
        Fuel::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// Annual consumption: electricity in kWh, other fuels in kBtu
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelConsumption {
    pub electricity_kwh: Option<Decimal>,
    pub natural_gas_kbtu: Option<Decimal>,
    pub fuel_oil_kbtu: Option<Decimal>,
    pub district_steam_kbtu: Option<Decimal>,
}

impl FuelConsumption {
    pub fn get(&self, fuel: Fuel) -> Option<Decimal> {
        match fuel {
            Fuel::Electricity => self.electricity_kwh,
            Fuel::NaturalGas => self.natural_gas_kbtu,
            Fuel::FuelOil => self.fuel_oil_kbtu,
            Fuel::DistrictSteam => self.district_steam_kbtu,
        }
    }

    pub fn set(&mut self, fuel: Fuel, value: Option<Decimal>) {
        match fuel {
            Fuel::Electricity => self.electricity_kwh = value,
            Fuel::NaturalGas => self.natural_gas_kbtu = value,
            Fuel::FuelOil => self.fuel_oil_kbtu = value,
            Fuel::DistrictSteam => self.district_steam_kbtu = value,
        }
    }

    /// True when no fuel has a value; a measured zero is a value
    pub fn is_all_absent(&self) -> bool {
        Fuel::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// Building-use classification for floor-area allowances
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UseCategory(String);

impl UseCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Energy-usage field group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub consumption: FuelConsumption,
    /// Square feet per use category; a missing category means zero
    pub floor_areas: BTreeMap<UseCategory, Decimal>,
    /// Secondary key whose benchmarking row was used
    pub matched_secondary_key: Option<String>,
    pub provenance: Provenance,
}

/// Mechanical-audit reporting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Era {
    #[serde(rename = "2012-2018")]
    Y2012To2018,
    #[serde(rename = "2019-2024")]
    Y2019To2024,
}

impl Era {
    pub fn label(&self) -> &'static str {
        match self {
            Era::Y2012To2018 => "2012-2018",
            Era::Y2019To2024 => "2019-2024",
        }
    }

    pub fn parse(label: &str) -> Option<Era> {
        match label.trim() {
            "2012-2018" => Some(Era::Y2012To2018),
            "2019-2024" => Some(Era::Y2019To2024),
            _ => None,
        }
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Building system an equipment line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemCategory {
    Envelope,
    Heating,
    Cooling,
    AirDistribution,
    Ventilation,
    DomesticHotWater,
}

impl SystemCategory {
    pub const ALL: [SystemCategory; 6] = [
        SystemCategory::Envelope,
        SystemCategory::Heating,
        SystemCategory::Cooling,
        SystemCategory::AirDistribution,
        SystemCategory::Ventilation,
        SystemCategory::DomesticHotWater,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            SystemCategory::Envelope => "Building Envelope",
            SystemCategory::Heating => "Heating System",
            SystemCategory::Cooling => "Cooling System",
            SystemCategory::AirDistribution => "Air Distribution",
            SystemCategory::Ventilation => "Ventilation",
            SystemCategory::DomesticHotWater => "Domestic Hot Water",
        }
    }
}

/// One equipment instance with its attribute lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentItem {
    /// Equipment kind as labelled in the audit, e.g. "Heating Plant"
    pub kind: String,
    /// 1-based instance number within the kind
    pub instance: u32,
    pub attributes: BTreeMap<String, String>,
}

/// Selected mechanical audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicalAuditRecord {
    pub era: Era,
    /// Audit template id; higher is a later revision
    pub revision_id: i64,
    /// Every instance kept, ordered by kind then instance
    pub systems: BTreeMap<SystemCategory, Vec<EquipmentItem>>,
}

impl MechanicalAuditRecord {
    pub fn equipment(&self, category: SystemCategory) -> &[EquipmentItem] {
        self.systems
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// All six outputs for one regulatory period, rounded to the cent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPenalty {
    /// tCO2e
    pub emissions: Decimal,
    /// tCO2e
    pub limit: Decimal,
    /// tCO2e over the limit, zero when under
    pub excess: Decimal,
    /// Dollars
    pub penalty: Decimal,
}

/// Penalty field group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PenaltyResult {
    Computed {
        periods: BTreeMap<String, PeriodPenalty>,
    },
    /// Inputs were missing; every output is absent
    Skipped { reason: String },
}

impl PenaltyResult {
    pub fn period(&self, period: &str) -> Option<&PeriodPenalty> {
        match self {
            PenaltyResult::Computed { periods } => periods.get(period),
            PenaltyResult::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PenaltyResult::Skipped { .. })
    }
}

/// Narrative text, or the generator's error for that category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrativeEntry {
    Text { text: String },
    Error { message: String },
}

/// Caller-supplied values, lowest precedence in every merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualEntry {
    pub address: Option<String>,
    pub zip_code: Option<String>,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub gross_floor_area: Option<Decimal>,
    pub num_floors: Option<Decimal>,
    pub owner_name: Option<String>,
    pub consumption: FuelConsumption,
}

/// Persisted record, one per canonical key
///
/// A `None` group was never written or was written as known-absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedLeadRecord {
    pub key: Bbl,
    pub identity: Option<BuildingIdentity>,
    pub characteristics: Option<BuildingCharacteristics>,
    pub energy: Option<EnergyProfile>,
    pub audit: Option<MechanicalAuditRecord>,
    pub penalty: Option<PenaltyResult>,
    pub narratives: Option<BTreeMap<SystemCategory, NarrativeEntry>>,
    /// Compact summary of contributing sources
    pub data_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_numbers_keep_every_digit() {
        let manual: ManualEntry = serde_json::from_str(
            r#"{"gross_floor_area": 100000.25, "consumption": {"electricity_kwh": 12345678901.123456789}}"#,
        )
        .unwrap();

        assert_eq!(
            manual.consumption.electricity_kwh,
            Some("12345678901.123456789".parse().unwrap())
        );
        assert_eq!(manual.gross_floor_area, Some("100000.25".parse().unwrap()));

        // Strings still parse, and decimals still serialize as strings
        let from_text: ManualEntry =
            serde_json::from_str(r#"{"consumption": {"electricity_kwh": "12345678901.123456789"}}"#).unwrap();
        assert_eq!(from_text.consumption, manual.consumption);
        let json = serde_json::to_value(&manual.consumption).unwrap();
        assert_eq!(json["electricity_kwh"], "12345678901.123456789");
    }

    #[test]
    fn test_pathway_display() {
        assert_eq!(CompliancePathway::display_list(&[]), "None assigned");
        assert_eq!(
            CompliancePathway::display_list(&[
                CompliancePathway::Cp0Article320Y2024,
                CompliancePathway::Cp3Article321OneTime
            ]),
            "CP0 (2024), CP3 (One-Time)"
        );
    }

    #[test]
    fn test_measured_zero_is_not_absent() {
        let mut consumption = FuelConsumption::default();
        assert!(consumption.is_all_absent());
        consumption.set(Fuel::FuelOil, Some(Decimal::ZERO));
        assert!(!consumption.is_all_absent());
    }

    #[test]
    fn test_era_labels() {
        assert_eq!(Era::parse("2019-2024"), Some(Era::Y2019To2024));
        assert_eq!(Era::parse("2012-2018"), Some(Era::Y2012To2018));
        assert_eq!(Era::parse("2025-2030"), None);
        assert_eq!(
            serde_json::to_string(&Era::Y2012To2018).unwrap(),
            "\"2012-2018\""
        );
    }

    #[test]
    fn test_penalty_result_serializes_tagged() {
        let skipped = PenaltyResult::Skipped {
            reason: "no fuel data".into(),
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["status"], "skipped");
        assert!(skipped.period("2024-2029").is_none());
    }
}
