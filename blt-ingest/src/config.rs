//! Pipeline configuration
//!
//! Built once per process from the TOML config and passed into the
//! pipeline constructor. Nothing here is read from globals afterwards.

use blt_common::config::TomlConfig;
use blt_common::{Error, Result};
use tracing::info;

use crate::penalty::{CoefficientTables, MissingFactorPolicy};
use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Geocoder matches below this are rejected
    pub geocode_confidence_threshold: f64,
    /// Registry retry policy
    pub retry: RetryPolicy,
    /// Buildings in flight during a batch
    pub concurrency: usize,
    /// Stored records newer than this are served without a rerun
    pub staleness: chrono::Duration,
    pub missing_factor: MissingFactorPolicy,
    pub coefficients: CoefficientTables,
}

impl PipelineConfig {
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let settings = &config.pipeline;

        if !(0.0..=1.0).contains(&settings.geocode_confidence_threshold) {
            return Err(Error::Config(format!(
                "geocode_confidence_threshold {} outside 0.0..=1.0",
                settings.geocode_confidence_threshold
            )));
        }

        let coefficients = match &config.coefficients_path {
            Some(path) => {
                info!("Loading coefficient tables from {}", path.display());
                CoefficientTables::load(path)?
            }
            None => CoefficientTables::embedded()?,
        };

        Ok(Self {
            geocode_confidence_threshold: settings.geocode_confidence_threshold,
            retry: RetryPolicy::from_config(&config.retry),
            concurrency: settings.concurrency.max(1),
            staleness: chrono::Duration::hours(settings.staleness_hours.max(0)),
            missing_factor: MissingFactorPolicy::from_setting(settings.missing_factor_default.as_deref())?,
            coefficients,
        })
    }
}
