//! Narrative hand-off
//!
//! Text generation happens downstream. This module assembles what the
//! generator reads (equipment lines per system category plus building
//! context) and stores what comes back in the narratives field group only.
//! A category the generator fails on is stored as an error entry; the rest
//! of the record is never touched.

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::keys::Bbl;
use crate::store::{FieldGroup, FieldMap, LeadStore};
use crate::types::{AggregatedLeadRecord, EquipmentItem, FuelConsumption, NarrativeEntry, SystemCategory};
use crate::units;

/// Building facts shared by every category's narrative
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeContext {
    pub address: Option<String>,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub gross_floor_area: Option<Decimal>,
    pub electricity_kwh: Option<Decimal>,
    pub natural_gas_therms: Option<Decimal>,
    pub fuel_oil_gallons: Option<Decimal>,
    pub district_steam_mlb: Option<Decimal>,
    /// All reported fuels in kBtu; absent when no fuel is reported
    pub site_energy_kbtu: Option<Decimal>,
    /// e.g. "2019-2024 (revision 4411)"
    pub audit_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryInput {
    pub title: String,
    /// One line per equipment instance; empty when the audit documents nothing
    pub equipment: Vec<String>,
}

/// Everything the generator needs for one building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeBundle {
    pub key: Bbl,
    pub context: NarrativeContext,
    pub categories: BTreeMap<SystemCategory, CategoryInput>,
}

fn equipment_line(item: &EquipmentItem) -> String {
    let attributes = item
        .attributes
        .iter()
        .map(|(name, value)| format!("{} = {}", name, value))
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} {}: {}", item.kind, item.instance, attributes)
}

fn round_units(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn site_energy_kbtu(consumption: &FuelConsumption) -> Option<Decimal> {
    let parts = [
        consumption.electricity_kwh.map(units::kwh_to_kbtu),
        consumption.natural_gas_kbtu,
        consumption.fuel_oil_kbtu,
        consumption.district_steam_kbtu,
    ];
    parts
        .into_iter()
        .flatten()
        .reduce(|total, kbtu| total + kbtu)
        .map(round_units)
}

impl NarrativeBundle {
    pub fn from_record(record: &AggregatedLeadRecord) -> Self {
        let characteristics = record.characteristics.as_ref();
        let consumption = record.energy.as_ref().map(|e| &e.consumption);

        let context = NarrativeContext {
            address: record.identity.as_ref().and_then(|i| i.address.clone()),
            year_built: characteristics.and_then(|c| c.year_built),
            property_type: characteristics.and_then(|c| c.property_type.clone()),
            gross_floor_area: characteristics.and_then(|c| c.gross_floor_area),
            electricity_kwh: consumption.and_then(|c| c.electricity_kwh),
            natural_gas_therms: consumption
                .and_then(|c| c.natural_gas_kbtu)
                .map(|v| round_units(units::kbtu_to_therms(v))),
            fuel_oil_gallons: consumption
                .and_then(|c| c.fuel_oil_kbtu)
                .map(|v| round_units(units::kbtu_to_gallons_fuel_oil(v))),
            district_steam_mlb: consumption
                .and_then(|c| c.district_steam_kbtu)
                .map(|v| round_units(units::kbtu_to_mlb_steam(v))),
            site_energy_kbtu: consumption.and_then(site_energy_kbtu),
            audit_source: record
                .audit
                .as_ref()
                .map(|a| format!("{} (revision {})", a.era, a.revision_id)),
        };

        let categories = SystemCategory::ALL
            .iter()
            .map(|category| {
                let equipment = record
                    .audit
                    .as_ref()
                    .map(|a| a.equipment(*category).iter().map(equipment_line).collect())
                    .unwrap_or_default();
                (
                    *category,
                    CategoryInput {
                        title: category.title().to_string(),
                        equipment,
                    },
                )
            })
            .collect();

        Self {
            key: record.key.clone(),
            context,
            categories,
        }
    }
}

/// Downstream text generator
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, category: SystemCategory, bundle: &NarrativeBundle) -> anyhow::Result<String>;
}

async fn stored_record(store: &dyn LeadStore, key: &Bbl) -> Result<AggregatedLeadRecord, PipelineError> {
    store
        .get(key)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("no lead record for {}", key)))
}

/// Bundle for a stored record
pub async fn bundle_for(store: &dyn LeadStore, key: &Bbl) -> Result<NarrativeBundle, PipelineError> {
    Ok(NarrativeBundle::from_record(&stored_record(store, key).await?))
}

/// Write generator output into the narratives group alone
pub async fn store_narratives(
    store: &dyn LeadStore,
    key: &Bbl,
    narratives: &BTreeMap<SystemCategory, NarrativeEntry>,
) -> Result<(), PipelineError> {
    // Narratives hang off an existing record; never create one from them
    stored_record(store, key).await?;

    let mut fields = FieldMap::new();
    fields.set(FieldGroup::Narratives, narratives)?;
    let receipt = store.upsert(key, &fields).await?;

    let failed = narratives
        .values()
        .filter(|entry| matches!(entry, NarrativeEntry::Error { .. }))
        .count();
    info!(bbl = %key, changed = receipt.changed, failed, "Narratives stored");
    Ok(())
}

/// Generate all six categories and store them
pub async fn attach_narratives(
    store: &dyn LeadStore,
    generator: &dyn NarrativeGenerator,
    key: &Bbl,
) -> Result<BTreeMap<SystemCategory, NarrativeEntry>, PipelineError> {
    let bundle = bundle_for(store, key).await?;

    let outputs = join_all(
        SystemCategory::ALL
            .iter()
            .map(|category| async { (*category, generator.generate(*category, &bundle).await) }),
    )
    .await;

    let narratives: BTreeMap<_, _> = outputs
        .into_iter()
        .map(|(category, output)| {
            let entry = match output {
                Ok(text) => NarrativeEntry::Text { text },
                Err(err) => {
                    warn!(bbl = %key, category = category.title(), error = %err, "Narrative generation failed");
                    NarrativeEntry::Error {
                        message: err.to_string(),
                    }
                }
            };
            (category, entry)
        })
        .collect();

    store_narratives(store, key, &narratives).await?;
    Ok(narratives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Era, MechanicalAuditRecord};
    use chrono::Utc;

    fn record() -> AggregatedLeadRecord {
        let mut systems = BTreeMap::new();
        systems.insert(
            SystemCategory::Heating,
            vec![
                EquipmentItem {
                    kind: "Heating Plant".into(),
                    instance: 1,
                    attributes: BTreeMap::from([("Fuel Type".to_string(), "Natural Gas".to_string())]),
                },
                EquipmentItem {
                    kind: "Heating Plant".into(),
                    instance: 2,
                    attributes: BTreeMap::from([("Fuel Type".to_string(), "Fuel Oil #2".to_string())]),
                },
            ],
        );

        AggregatedLeadRecord {
            key: Bbl::parse("1008350041").unwrap(),
            identity: None,
            characteristics: None,
            energy: Some(crate::types::EnergyProfile {
                consumption: FuelConsumption {
                    natural_gas_kbtu: Some(Decimal::from(5_000_000)),
                    ..Default::default()
                },
                ..Default::default()
            }),
            audit: Some(MechanicalAuditRecord {
                era: Era::Y2019To2024,
                revision_id: 4411,
                systems,
            }),
            penalty: None,
            narratives: None,
            data_source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_bundle_keeps_every_instance() {
        let bundle = NarrativeBundle::from_record(&record());
        let heating = &bundle.categories[&SystemCategory::Heating];
        assert_eq!(
            heating.equipment,
            vec![
                "Heating Plant 1: Fuel Type = Natural Gas".to_string(),
                "Heating Plant 2: Fuel Type = Fuel Oil #2".to_string(),
            ]
        );
        assert!(bundle.categories[&SystemCategory::Cooling].equipment.is_empty());
        assert_eq!(bundle.categories.len(), 6);
    }

    #[test]
    fn test_context_uses_billing_units() {
        let bundle = NarrativeBundle::from_record(&record());
        assert_eq!(bundle.context.natural_gas_therms, Some(Decimal::from(50_000)));
        assert_eq!(bundle.context.electricity_kwh, None);
        assert_eq!(bundle.context.site_energy_kbtu, Some(Decimal::from(5_000_000)));
        assert_eq!(bundle.context.audit_source.as_deref(), Some("2019-2024 (revision 4411)"));
    }

    #[test]
    fn test_site_energy_converts_electricity_to_kbtu() {
        let mut record = record();
        if let Some(energy) = record.energy.as_mut() {
            energy.consumption.electricity_kwh = Some(Decimal::from(1000));
        }

        let bundle = NarrativeBundle::from_record(&record);
        assert_eq!(bundle.context.electricity_kwh, Some(Decimal::from(1000)));
        assert_eq!(bundle.context.site_energy_kbtu, Some(Decimal::from(5_003_412)));

        record.energy = None;
        let bundle = NarrativeBundle::from_record(&record);
        assert_eq!(bundle.context.site_energy_kbtu, None);
    }
}
