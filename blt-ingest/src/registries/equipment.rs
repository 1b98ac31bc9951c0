//! Audit equipment line parsing
//!
//! Audit rows are flat objects with column names such as
//! `"Heating Plant 2: Fuel Type"` (recent window) or
//! `"Systems_Heating Plant 2_Fuel Type"` (older window). A column names an
//! equipment kind, an optional instance number and an attribute. Columns
//! that do not name recognisable equipment are ignored.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::parse::text_from_json;
use crate::types::{EquipmentItem, SystemCategory};

/// Checked in order; the first category with a matching keyword wins
const CATEGORY_KEYWORDS: [(SystemCategory, &[&str]); 6] = [
    (
        SystemCategory::DomesticHotWater,
        &["domestic hot water", "dhw", "water heater", "hot water"],
    ),
    (
        SystemCategory::Ventilation,
        &["ventilation", "exhaust", "makeup air", "make-up air", "energy recovery", "heat recovery", "doas"],
    ),
    (
        SystemCategory::AirDistribution,
        &["air distribution", "air handling", "ahu", "rooftop unit", "packaged unit", "fan coil", "terminal unit"],
    ),
    (
        SystemCategory::Cooling,
        &["cooling", "chiller", "condenser", "chilled water"],
    ),
    (
        SystemCategory::Heating,
        &["heating", "boiler", "furnace", "heat pump", "heat exchanger"],
    ),
    (
        SystemCategory::Envelope,
        &["envelope", "wall", "roof", "window", "fenestration", "foundation", "glazing"],
    ),
];

pub fn categorize(kind: &str) -> Option<SystemCategory> {
    let lowered = kind.to_ascii_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
}

/// Split a column name into (kind, instance, attribute)
fn split_column(column: &str) -> Option<(String, u32, String)> {
    let (head, attribute) = match column.split_once(':') {
        Some((head, attribute)) => (head, attribute),
        None => {
            let (path, attribute) = column.rsplit_once('_')?;
            let head = path.rsplit('_').next().unwrap_or(path);
            (head, attribute)
        }
    };

    let head = head.trim();
    let attribute = attribute.trim();
    if head.is_empty() || attribute.is_empty() {
        return None;
    }

    match head.rsplit_once(' ') {
        Some((kind, number)) if number.chars().all(|c| c.is_ascii_digit()) => {
            let instance = number.parse().ok()?;
            Some((kind.trim().to_string(), instance, attribute.to_string()))
        }
        _ => Some((head.to_string(), 1, attribute.to_string())),
    }
}

/// Group a raw audit row into categories, keeping every instance
pub fn parse_equipment(raw: &Map<String, Value>) -> BTreeMap<SystemCategory, Vec<EquipmentItem>> {
    let mut grouped: BTreeMap<SystemCategory, BTreeMap<(String, u32), BTreeMap<String, String>>> =
        BTreeMap::new();

    for (column, value) in raw {
        let Some((kind, instance, attribute)) = split_column(column) else {
            continue;
        };
        let Some(category) = categorize(&kind) else {
            continue;
        };
        let text = match value {
            Value::Bool(flag) => Some(flag.to_string()),
            other => text_from_json(other),
        };
        let Some(text) = text else {
            continue;
        };

        grouped
            .entry(category)
            .or_default()
            .entry((kind, instance))
            .or_default()
            .insert(attribute, text);
    }

    grouped
        .into_iter()
        .map(|(category, items)| {
            let items = items
                .into_iter()
                .map(|((kind, instance), attributes)| EquipmentItem {
                    kind,
                    instance,
                    attributes,
                })
                .collect();
            (category, items)
        })
        .collect()
}
