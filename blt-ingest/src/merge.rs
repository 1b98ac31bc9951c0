//! Source-priority merge engine
//!
//! Every merged field has a fixed, ordered source list; the first source
//! with a non-null value wins no matter what later sources hold. Disagreeing
//! later values are reported as conflicts with a string similarity score so
//! reviewers can tell formatting noise from real disagreement.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use strsim::normalized_levenshtein;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::keys::SecondaryKeys;
use crate::registries::{call_with_retry, names, EnergyUsageRecord, EnergyUsageRegistry, StructureRecord};
use crate::types::{
    BuildingCharacteristics, EnergyProfile, Fuel, FuelConsumption, ManualEntry, Provenance, Source,
    UseCategory,
};
use crate::utils::retry::RetryPolicy;

/// Identity and address fields
pub const IDENTITY_PRECEDENCE: [Source; 4] = [
    Source::ComplianceRegistry,
    Source::StructureRegistry,
    Source::GeocodingService,
    Source::Manual,
];

/// Building characteristics and aggregate energy
pub const CHARACTERISTIC_PRECEDENCE: [Source; 3] = [
    Source::EnergyUsageRegistry,
    Source::StructureRegistry,
    Source::Manual,
];

/// Per-category floor area: no fallback
pub const FLOOR_AREA_PRECEDENCE: [Source; 1] = [Source::EnergyUsageRegistry];

/// Two sources disagreed on a field; the higher-precedence value was kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub field: String,
    pub kept_source: Source,
    pub kept_value: String,
    pub other_source: Source,
    pub other_value: String,
    /// Normalized Levenshtein similarity of the two renderings, 0.0 to 1.0
    pub similarity: f64,
}

/// Applies precedence field by field, collecting provenance and conflicts
#[derive(Debug, Default)]
pub struct FieldMerger {
    provenance: Provenance,
    conflicts: Vec<ConflictReport>,
}

impl FieldMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// First non-null candidate in `precedence` order
    ///
    /// Candidates from sources outside `precedence` are never consulted.
    pub fn pick<T>(&mut self, field: &str, precedence: &[Source], candidates: &[(Source, Option<T>)]) -> Option<T>
    where
        T: Clone + PartialEq + Display,
    {
        let ranked: Vec<(Source, &T)> = precedence
            .iter()
            .filter_map(|source| {
                candidates
                    .iter()
                    .find(|(candidate_source, _)| candidate_source == source)
                    .and_then(|(_, value)| value.as_ref())
                    .map(|value| (*source, value))
            })
            .collect();

        let (kept_source, kept) = *ranked.first()?;

        for (other_source, other) in ranked.iter().skip(1) {
            if *other != kept {
                let kept_value = kept.to_string();
                let other_value = other.to_string();
                let similarity = normalized_levenshtein(&kept_value, &other_value);
                warn!(
                    field,
                    kept_source = %kept_source,
                    other_source = %other_source,
                    similarity,
                    "Source conflict, keeping higher-precedence value"
                );
                self.conflicts.push(ConflictReport {
                    field: field.to_string(),
                    kept_source,
                    kept_value,
                    other_source: *other_source,
                    other_value,
                    similarity,
                });
            }
        }

        self.provenance.insert(field.to_string(), kept_source);
        Some(kept.clone())
    }

    /// Provenance gathered so far, leaving conflicts in place
    pub fn take_provenance(&mut self) -> Provenance {
        std::mem::take(&mut self.provenance)
    }

    pub fn into_conflicts(self) -> Vec<ConflictReport> {
        self.conflicts
    }
}

/// Upstream values available to the merge
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceSnapshot<'a> {
    pub structure: Option<&'a StructureRecord>,
    pub energy: Option<&'a EnergyUsageRecord>,
    pub manual: Option<&'a ManualEntry>,
}

/// Merged characteristic and energy groups
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub characteristics: BuildingCharacteristics,
    /// `None` when no source supplied any energy data
    pub energy: Option<EnergyProfile>,
    pub conflicts: Vec<ConflictReport>,
}

/// Merge characteristics and energy by declared precedence
pub fn merge_sources(snapshot: &SourceSnapshot<'_>) -> MergeOutcome {
    let SourceSnapshot {
        structure,
        energy,
        manual,
    } = *snapshot;
    let mut merger = FieldMerger::new();

    let characteristics = BuildingCharacteristics {
        year_built: merger.pick(
            "year_built",
            &CHARACTERISTIC_PRECEDENCE,
            &[
                (Source::EnergyUsageRegistry, energy.and_then(|e| e.year_built)),
                (Source::StructureRegistry, structure.and_then(|s| s.year_built)),
                (Source::Manual, manual.and_then(|m| m.year_built)),
            ],
        ),
        property_type: merger.pick(
            "property_type",
            &CHARACTERISTIC_PRECEDENCE,
            &[
                (Source::EnergyUsageRegistry, energy.and_then(|e| e.property_type.clone())),
                (Source::Manual, manual.and_then(|m| m.property_type.clone())),
            ],
        ),
        gross_floor_area: merger.pick(
            "gross_floor_area",
            &CHARACTERISTIC_PRECEDENCE,
            &[
                (Source::EnergyUsageRegistry, energy.and_then(|e| e.gross_floor_area)),
                (Source::StructureRegistry, structure.and_then(|s| s.building_area)),
                (Source::Manual, manual.and_then(|m| m.gross_floor_area)),
            ],
        ),
        num_floors: merger.pick(
            "num_floors",
            &CHARACTERISTIC_PRECEDENCE,
            &[
                (Source::StructureRegistry, structure.and_then(|s| s.num_floors)),
                (Source::Manual, manual.and_then(|m| m.num_floors)),
            ],
        ),
        owner_name: merger.pick(
            "owner_name",
            &CHARACTERISTIC_PRECEDENCE,
            &[
                (Source::StructureRegistry, structure.and_then(|s| s.owner_name.clone())),
                (Source::Manual, manual.and_then(|m| m.owner_name.clone())),
            ],
        ),
        site_eui: merger.pick(
            "site_eui",
            &CHARACTERISTIC_PRECEDENCE,
            &[(Source::EnergyUsageRegistry, energy.and_then(|e| e.site_eui))],
        ),
        energy_star_score: merger.pick(
            "energy_star_score",
            &CHARACTERISTIC_PRECEDENCE,
            &[(Source::EnergyUsageRegistry, energy.and_then(|e| e.energy_star_score))],
        ),
        provenance: Provenance::new(),
    };
    let characteristics = BuildingCharacteristics {
        provenance: merger.take_provenance(),
        ..characteristics
    };

    let mut consumption = FuelConsumption::default();
    for fuel in Fuel::ALL {
        let value = merger.pick(
            fuel.as_str(),
            &CHARACTERISTIC_PRECEDENCE,
            &[
                (Source::EnergyUsageRegistry, energy.and_then(|e| e.consumption.get(fuel))),
                (Source::Manual, manual.and_then(|m| m.consumption.get(fuel))),
            ],
        );
        consumption.set(fuel, value);
    }

    let mut floor_areas: BTreeMap<UseCategory, Decimal> = BTreeMap::new();
    if let Some(record) = energy {
        for (category, area) in &record.floor_areas {
            let field = format!("floor_area.{}", category);
            if let Some(area) = merger.pick(
                &field,
                &FLOOR_AREA_PRECEDENCE,
                &[(Source::EnergyUsageRegistry, Some(*area))],
            ) {
                floor_areas.insert(category.clone(), area);
            }
        }
    }

    let energy_provenance = merger.take_provenance();
    let energy_profile = if energy.is_none() && consumption.is_all_absent() {
        None
    } else {
        Some(EnergyProfile {
            consumption,
            floor_areas,
            matched_secondary_key: energy
                .and_then(|e| e.matched_key.as_ref())
                .map(|bin| bin.to_string()),
            provenance: energy_provenance,
        })
    };

    MergeOutcome {
        characteristics,
        energy: energy_profile,
        conflicts: merger.into_conflicts(),
    }
}

/// Query the energy registry by each secondary key in order; first hit wins
pub async fn fetch_energy(
    registry: &dyn EnergyUsageRegistry,
    secondary_keys: &SecondaryKeys,
    policy: &RetryPolicy,
) -> Result<Option<EnergyUsageRecord>, PipelineError> {
    for bin in secondary_keys.iter() {
        let found = call_with_retry(names::ENERGY, policy, || registry.lookup(bin)).await?;
        if let Some(record) = found {
            debug!(bin = %bin, "Energy usage record found");
            return Ok(Some(record));
        }
    }

    if secondary_keys.is_empty() {
        debug!("No secondary keys, skipping energy usage lookup");
    }
    Ok(None)
}
