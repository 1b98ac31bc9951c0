//! Identity resolver
//!
//! Turns a building reference (canonical key or free-text address) into a
//! [`BuildingIdentity`]:
//! 1. A compliance registry hit is authoritative; its key and address are
//!    used as-is and never re-derived by geocoding.
//! 2. Otherwise an address is found (structure registry for a key, the text
//!    itself for an address) and geocoded. Matches below the confidence
//!    threshold fail the building instead of being guessed at.
//!
//! The structure record fetched along the way is handed on so the merge
//! stage does not ask for it again.

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::keys::{Bbl, BuildingRef, SecondaryKeys};
use crate::merge::{FieldMerger, IDENTITY_PRECEDENCE};
use crate::registries::sqlite::normalize_address;
use crate::registries::{
    call_with_retry, names, ComplianceRecord, GeocodeMatch, Registries, StructureRecord,
};
use crate::types::{BuildingIdentity, ManualEntry, Source};
use crate::utils::retry::RetryPolicy;

/// Identity plus the structure record fetched while resolving it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub identity: BuildingIdentity,
    pub structure: Option<StructureRecord>,
}

/// Everything known about the building once its key is settled
struct Evidence<'a> {
    key: Bbl,
    key_source: Source,
    compliance: Option<ComplianceRecord>,
    structure: Option<StructureRecord>,
    geocode: Option<GeocodeMatch>,
    input_address: Option<&'a str>,
    manual: Option<&'a ManualEntry>,
}

pub struct IdentityResolver {
    registries: Registries,
    confidence_threshold: f64,
    retry: RetryPolicy,
}

impl IdentityResolver {
    pub fn new(registries: Registries, confidence_threshold: f64, retry: RetryPolicy) -> Self {
        Self {
            registries,
            confidence_threshold,
            retry,
        }
    }

    pub async fn resolve(
        &self,
        reference: &BuildingRef,
        manual: Option<&ManualEntry>,
    ) -> Result<ResolvedIdentity, PipelineError> {
        let evidence = match reference {
            BuildingRef::Key(key) => self.resolve_key(key, manual).await?,
            BuildingRef::Address(address) => self.resolve_address(address, manual).await?,
        };

        info!(
            bbl = %evidence.key,
            key_source = %evidence.key_source,
            covered = evidence.compliance.is_some(),
            "Identity resolved"
        );

        let structure = evidence.structure.clone();
        Ok(ResolvedIdentity {
            identity: build_identity(evidence),
            structure,
        })
    }

    async fn resolve_key<'a>(
        &self,
        key: &Bbl,
        manual: Option<&'a ManualEntry>,
    ) -> Result<Evidence<'a>, PipelineError> {
        let compliance = self.compliance_by_key(key).await?;
        let structure = self.structure(key).await?;

        if compliance.is_some() {
            return Ok(Evidence {
                key: key.clone(),
                key_source: Source::ComplianceRegistry,
                compliance,
                structure,
                geocode: None,
                input_address: None,
                manual,
            });
        }

        let address = structure
            .as_ref()
            .and_then(|s| s.address.clone())
            .or_else(|| manual.and_then(|m| m.address.clone()));

        let Some(address) = address else {
            if structure.is_none() {
                return Err(PipelineError::NotFound(key.to_string()));
            }
            debug!(bbl = %key, "Structure record has no address; skipping geocoding");
            return Ok(Evidence {
                key: key.clone(),
                key_source: Source::StructureRegistry,
                compliance: None,
                structure,
                geocode: None,
                input_address: None,
                manual,
            });
        };

        let mut geocode = self.geocode(&address).await?;
        match geocode.as_mut() {
            Some(found) if found.candidate_key.as_ref().is_some_and(|c| c != key) => {
                warn!(
                    bbl = %key,
                    geocoded = ?found.candidate_key,
                    "Geocoder disagrees with supplied key; keeping supplied key"
                );
                // Its structure id belongs to the other lot
                found.secondary_key = None;
            }
            Some(_) => {}
            None => debug!(bbl = %key, address = %address, "No geocoder candidate"),
        }

        let key_source = if structure.is_some() {
            Source::StructureRegistry
        } else {
            Source::Manual
        };

        Ok(Evidence {
            key: key.clone(),
            key_source,
            compliance: None,
            structure,
            geocode,
            input_address: None,
            manual,
        })
    }

    async fn resolve_address<'a>(
        &self,
        address: &'a str,
        manual: Option<&'a ManualEntry>,
    ) -> Result<Evidence<'a>, PipelineError> {
        let registry = self.registries.compliance.as_ref();
        let listed = call_with_retry(names::COMPLIANCE, &self.retry, || {
            registry.lookup_by_address(address)
        })
        .await?;

        if let Some(record) = listed {
            let key = record.key.clone();
            let structure = self.structure(&key).await?;
            return Ok(Evidence {
                key,
                key_source: Source::ComplianceRegistry,
                compliance: Some(record),
                structure,
                geocode: None,
                input_address: Some(address),
                manual,
            });
        }

        let geocode = self
            .geocode(address)
            .await?
            .ok_or_else(|| PipelineError::NotFound(address.to_string()))?;
        let key = geocode
            .candidate_key
            .clone()
            .ok_or_else(|| PipelineError::NotFound(address.to_string()))?;

        let compliance = self.compliance_by_key(&key).await?;
        let structure = self.structure(&key).await?;

        let key_source = if compliance.is_some() {
            Source::ComplianceRegistry
        } else {
            Source::GeocodingService
        };

        Ok(Evidence {
            key,
            key_source,
            compliance,
            structure,
            geocode: Some(geocode),
            input_address: Some(address),
            manual,
        })
    }

    async fn compliance_by_key(&self, key: &Bbl) -> Result<Option<ComplianceRecord>, PipelineError> {
        let registry = self.registries.compliance.as_ref();
        call_with_retry(names::COMPLIANCE, &self.retry, || registry.lookup_by_key(key)).await
    }

    async fn structure(&self, key: &Bbl) -> Result<Option<StructureRecord>, PipelineError> {
        let registry = self.registries.structure.as_ref();
        call_with_retry(names::STRUCTURE, &self.retry, || registry.lookup(key)).await
    }

    /// Geocode, rejecting candidates below the confidence threshold
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeMatch>, PipelineError> {
        let geocoder = self.registries.geocoder.as_ref();
        let found = call_with_retry(names::GEOCODER, &self.retry, || geocoder.resolve(address)).await?;

        if let Some(candidate) = &found {
            if candidate.confidence.is_nan() || candidate.confidence < self.confidence_threshold {
                warn!(
                    address,
                    confidence = candidate.confidence,
                    threshold = self.confidence_threshold,
                    "Low-confidence geocoding match rejected"
                );
                return Err(PipelineError::LowConfidence {
                    address: address.to_string(),
                    confidence: candidate.confidence,
                    threshold: self.confidence_threshold,
                });
            }
        }

        Ok(found)
    }
}

fn build_identity(evidence: Evidence<'_>) -> BuildingIdentity {
    let Evidence {
        key,
        key_source,
        compliance,
        structure,
        geocode,
        input_address,
        manual,
    } = evidence;

    let mut merger = FieldMerger::new();

    let address_candidates = [
        (Source::ComplianceRegistry, compliance.as_ref().and_then(|c| c.address.clone())),
        (Source::StructureRegistry, structure.as_ref().and_then(|s| s.address.clone())),
        (Source::GeocodingService, geocode.as_ref().and_then(|g| g.label.clone())),
        (Source::Manual, manual.and_then(|m| m.address.clone())),
    ];
    let address = merger.pick("address", &IDENTITY_PRECEDENCE, &address_candidates);

    let zip_code = merger.pick(
        "zip_code",
        &IDENTITY_PRECEDENCE,
        &[
            (Source::ComplianceRegistry, compliance.as_ref().and_then(|c| c.zip_code.clone())),
            (Source::StructureRegistry, structure.as_ref().and_then(|s| s.zip_code.clone())),
            (Source::Manual, manual.and_then(|m| m.zip_code.clone())),
        ],
    );

    let mut provenance = merger.take_provenance();
    provenance.insert("key".to_string(), key_source);

    // Compliance keys first; the geocoder's key is only added off the registry path
    let mut secondary_keys = SecondaryKeys::new();
    if let Some(record) = &compliance {
        secondary_keys.extend(&record.secondary_keys);
        if !record.secondary_keys.is_empty() {
            provenance.insert("secondary_keys".to_string(), Source::ComplianceRegistry);
        }
    }
    if let Some(bin) = geocode.as_ref().and_then(|g| g.secondary_key.clone()) {
        if secondary_keys.insert(bin) && !provenance.contains_key("secondary_keys") {
            provenance.insert("secondary_keys".to_string(), Source::GeocodingService);
        }
    }

    let canonical = address.as_deref().map(normalize_address);
    let mut alias_addresses: Vec<String> = Vec::new();
    let mut seen: Vec<String> = canonical.into_iter().collect();
    let other_addresses = address_candidates
        .into_iter()
        .filter_map(|(_, candidate)| candidate)
        .chain(input_address.map(str::to_string));
    for alias in other_addresses {
        let normalized = normalize_address(&alias);
        if !seen.contains(&normalized) {
            seen.push(normalized);
            alias_addresses.push(alias);
        }
    }

    BuildingIdentity {
        borough: key.borough_name().to_string(),
        key,
        secondary_keys,
        address,
        zip_code,
        alias_addresses,
        geocode_confidence: geocode.as_ref().map(|g| g.confidence),
        covered: compliance.is_some(),
        compliance_pathways: compliance.map(|c| c.pathways).unwrap_or_default(),
        provenance,
    }
}
