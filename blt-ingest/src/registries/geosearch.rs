//! GeoSearch geocoder adapter
//!
//! `GET {geosearch_url}?text=<address>` returns a GeoJSON feature collection;
//! the first feature is the best candidate. Keys live under
//! `properties.addendum.pad`.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::HttpRegistryClient;
use super::{GeocodeMatch, GeocodingService};
use crate::error::{RegistryError, RegistryResult};
use crate::keys::{Bbl, Bin};

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: FeatureProperties,
}

#[derive(Debug, Deserialize)]
struct FeatureProperties {
    confidence: Option<f64>,
    label: Option<String>,
    #[serde(default)]
    addendum: Option<Addendum>,
}

#[derive(Debug, Deserialize)]
struct Addendum {
    pad: Option<PadAddendum>,
}

#[derive(Debug, Deserialize)]
struct PadAddendum {
    bbl: Option<String>,
    bin: Option<String>,
}

pub struct GeoSearchClient {
    http: HttpRegistryClient,
    endpoint: String,
}

impl GeoSearchClient {
    pub fn new(http: HttpRegistryClient, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

fn into_match(feature: Feature) -> RegistryResult<GeocodeMatch> {
    let properties = feature.properties;
    let confidence = properties
        .confidence
        .ok_or_else(|| RegistryError::Malformed("geocoder feature without confidence".into()))?;

    let pad = properties.addendum.and_then(|a| a.pad);
    let (bbl, bin) = match pad {
        Some(pad) => (pad.bbl, pad.bin),
        None => (None, None),
    };

    Ok(GeocodeMatch {
        candidate_key: bbl.as_deref().and_then(|b| Bbl::parse(b).ok()),
        secondary_key: bin.as_deref().and_then(Bin::parse),
        label: properties.label,
        confidence,
    })
}

#[async_trait]
impl GeocodingService for GeoSearchClient {
    async fn resolve(&self, address: &str) -> RegistryResult<Option<GeocodeMatch>> {
        let collection: Option<FeatureCollection> = self
            .http
            .get_json(&self.endpoint, &[("text", address.to_string())])
            .await?;

        match collection.and_then(|c| c.features.into_iter().next()) {
            Some(feature) => into_match(feature).map(Some),
            None => {
                tracing::debug!(address, "Geocoder returned no candidates");
                Ok(None)
            }
        }
    }
}
