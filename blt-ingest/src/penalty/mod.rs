//! Penalty calculation engine
//!
//! Pure and deterministic. Per regulatory period:
//! 1. `emissions = Σ consumption[fuel] × coefficient[fuel]`
//! 2. `limit = Σ floor_area[category] × factor[category]`
//! 3. `penalty = max(emissions − limit, 0) × rate`
//!
//! Sums stay unrounded; the four reported values are rounded to the cent,
//! half away from zero, at the end. With no fuel data at all the result is
//! `Skipped`, never zeros. Missing floor areas only make the limit zero.

pub mod tables;

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{Fuel, FuelConsumption, PenaltyResult, PeriodPenalty, UseCategory};
pub use tables::{CoefficientTables, PeriodCoefficients};

/// Treatment of floor-area categories with no factor in a period table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MissingFactorPolicy {
    /// Leave the category out of the limit
    #[default]
    Exclude,
    /// Apply this factor instead
    DefaultFactor(Decimal),
}

impl MissingFactorPolicy {
    /// `None` excludes; otherwise the text must be a decimal factor
    pub fn from_setting(setting: Option<&str>) -> blt_common::Result<Self> {
        match setting.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(MissingFactorPolicy::Exclude),
            Some(text) => crate::parse::decimal_from_text(text)
                .map(MissingFactorPolicy::DefaultFactor)
                .ok_or_else(|| {
                    blt_common::Error::Config(format!("missing_factor_default '{}' is not a decimal", text))
                }),
        }
    }
}

pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone)]
pub struct PenaltyEngine {
    tables: CoefficientTables,
    missing_factor: MissingFactorPolicy,
}

impl PenaltyEngine {
    pub fn new(tables: CoefficientTables, missing_factor: MissingFactorPolicy) -> Self {
        Self {
            tables,
            missing_factor,
        }
    }

    pub fn tables(&self) -> &CoefficientTables {
        &self.tables
    }

    /// Unrounded emissions; an absent fuel contributes nothing
    pub fn emissions(period: &PeriodCoefficients, consumption: &FuelConsumption) -> Decimal {
        Fuel::ALL
            .iter()
            .filter_map(|fuel| consumption.get(*fuel).map(|amount| amount * period.fuel_coefficient(*fuel)))
            .sum()
    }

    /// Unrounded limit; non-positive areas contribute nothing
    pub fn limit(&self, period: &PeriodCoefficients, floor_areas: &BTreeMap<UseCategory, Decimal>) -> Decimal {
        let mut total = Decimal::ZERO;
        for (category, area) in floor_areas {
            if *area <= Decimal::ZERO {
                continue;
            }
            let factor = match (period.category.get(category), &self.missing_factor) {
                (Some(factor), _) => *factor,
                (None, MissingFactorPolicy::DefaultFactor(default)) => *default,
                (None, MissingFactorPolicy::Exclude) => {
                    debug!(category = %category, "No emission factor; excluded from limit");
                    continue;
                }
            };
            total += *area * factor;
        }
        total
    }

    pub fn calculate(
        &self,
        consumption: &FuelConsumption,
        floor_areas: &BTreeMap<UseCategory, Decimal>,
    ) -> PenaltyResult {
        if consumption.is_all_absent() {
            return PenaltyResult::Skipped {
                reason: "no fuel consumption data".to_string(),
            };
        }

        let periods = self
            .tables
            .periods
            .iter()
            .map(|(label, coefficients)| {
                let emissions = Self::emissions(coefficients, consumption);
                let limit = self.limit(coefficients, floor_areas);
                let excess = (emissions - limit).max(Decimal::ZERO);
                let penalty = excess * self.tables.penalty_rate_per_ton;

                (
                    label.clone(),
                    PeriodPenalty {
                        emissions: round_cents(emissions),
                        limit: round_cents(limit),
                        excess: round_cents(excess),
                        penalty: round_cents(penalty),
                    },
                )
            })
            .collect();

        PenaltyResult::Computed { periods }
    }
}
