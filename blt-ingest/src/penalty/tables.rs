//! Versioned coefficient tables
//!
//! One table per regulatory period: fuel → carbon coefficient and use
//! category → emission factor, plus the single dollar rate per excess ton.
//! The default tables are compiled in from `data/coefficients.toml`; a
//! replacement file can be configured. Values are TOML strings so they parse
//! straight into `Decimal`.

use blt_common::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::types::{Fuel, UseCategory};

pub const EMBEDDED_COEFFICIENTS: &str = include_str!("../../data/coefficients.toml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTables {
    penalty_rate_per_ton: String,
    periods: BTreeMap<String, RawPeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPeriod {
    fuel: BTreeMap<String, String>,
    #[serde(default)]
    category: BTreeMap<String, String>,
}

/// Coefficients for one regulatory period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodCoefficients {
    /// tCO2e per kWh (electricity) or per kBtu
    pub fuel: BTreeMap<Fuel, Decimal>,
    /// tCO2e per square foot
    pub category: BTreeMap<UseCategory, Decimal>,
}

impl PeriodCoefficients {
    pub fn fuel_coefficient(&self, fuel: Fuel) -> Decimal {
        // Validated at load: every period carries all four fuels
        self.fuel.get(&fuel).copied().unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoefficientTables {
    pub penalty_rate_per_ton: Decimal,
    /// Keyed by period label, e.g. "2024-2029"
    pub periods: BTreeMap<String, PeriodCoefficients>,
}

fn parse_decimal(context: &str, text: &str) -> Result<Decimal> {
    Decimal::from_str(text.trim())
        .map_err(|e| Error::Config(format!("coefficient {} = '{}': {}", context, text, e)))
}

impl CoefficientTables {
    /// The compiled-in tables
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_COEFFICIENTS)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read coefficients {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawTables = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse coefficients failed: {}", e)))?;

        if raw.periods.is_empty() {
            return Err(Error::Config("coefficient tables define no periods".into()));
        }

        let penalty_rate_per_ton = parse_decimal("penalty_rate_per_ton", &raw.penalty_rate_per_ton)?;

        let mut periods = BTreeMap::new();
        for (label, raw_period) in raw.periods {
            let mut fuel = BTreeMap::new();
            for (name, value) in &raw_period.fuel {
                let parsed_fuel = Fuel::parse(name).ok_or_else(|| {
                    Error::Config(format!("period {}: unknown fuel '{}'", label, name))
                })?;
                fuel.insert(parsed_fuel, parse_decimal(&format!("{}.fuel.{}", label, name), value)?);
            }
            if let Some(missing) = Fuel::ALL.iter().find(|f| !fuel.contains_key(f)) {
                return Err(Error::Config(format!(
                    "period {}: missing fuel coefficient '{}'",
                    label,
                    missing.as_str()
                )));
            }

            let mut category = BTreeMap::new();
            for (name, value) in &raw_period.category {
                category.insert(
                    UseCategory::new(name.clone()),
                    parse_decimal(&format!("{}.category.{}", label, name), value)?,
                );
            }

            periods.insert(label, PeriodCoefficients { fuel, category });
        }

        Ok(Self {
            penalty_rate_per_ton,
            periods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_tables() {
        let tables = CoefficientTables::embedded().unwrap();
        assert_eq!(tables.penalty_rate_per_ton, Decimal::from(268));
        assert_eq!(
            tables.periods.keys().cloned().collect::<Vec<_>>(),
            vec!["2024-2029".to_string(), "2030-2034".to_string()]
        );

        let first = &tables.periods["2024-2029"];
        assert_eq!(
            first.fuel_coefficient(Fuel::Electricity),
            Decimal::from_str("0.000288962").unwrap()
        );
        assert_eq!(first.category.len(), 55);
        assert_eq!(
            first.category[&UseCategory::new("office")],
            Decimal::from_str("0.00758").unwrap()
        );

        let second = &tables.periods["2030-2034"];
        assert_eq!(
            second.fuel_coefficient(Fuel::DistrictSteam),
            Decimal::from_str("0.0000432").unwrap()
        );
        assert_eq!(
            second.category[&UseCategory::new("office")],
            Decimal::from_str("0.002690852").unwrap()
        );
    }

    #[test]
    fn test_missing_fuel_rejected() {
        let content = r#"
            penalty_rate_per_ton = "268"
            [periods."2035-2039".fuel]
            electricity = "0.0001"
            natural_gas = "0.00005311"
            fuel_oil = "0.00007421"
        "#;
        let err = CoefficientTables::from_toml_str(content).unwrap_err();
        assert!(err.to_string().contains("district_steam"));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let content = r#"
            penalty_rate_per_ton = "two hundred"
            [periods."2035-2039".fuel]
            electricity = "0.0001"
            natural_gas = "0.0001"
            fuel_oil = "0.0001"
            district_steam = "0.0001"
        "#;
        assert!(CoefficientTables::from_toml_str(content).is_err());
    }

    #[test]
    fn test_new_period_needs_no_code_change() {
        let content = r#"
            penalty_rate_per_ton = "268"
            [periods."2035-2039".fuel]
            electricity = "0.0001"
            natural_gas = "0.0001"
            fuel_oil = "0.0001"
            district_steam = "0.0001"
            [periods."2035-2039".category]
            office = "0.001"
        "#;
        let tables = CoefficientTables::from_toml_str(content).unwrap();
        assert!(tables.periods.contains_key("2035-2039"));
    }
}
