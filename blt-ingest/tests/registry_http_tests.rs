//! Registry adapters against a mock HTTP server

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use blt_common::config::RegistryConfig;
use blt_ingest::error::{PipelineError, RegistryError};
use blt_ingest::keys::{Bbl, Bin};
use blt_ingest::registries::geosearch::GeoSearchClient;
use blt_ingest::registries::http::HttpRegistryClient;
use blt_ingest::registries::socrata::{SocrataEnergyRegistry, SocrataStructureRegistry};
use blt_ingest::registries::{
    call_with_retry, names, EnergyUsageRegistry, GeocodingService, StructureRegistry,
};
use blt_ingest::utils::retry::RetryPolicy;

fn client(token: Option<&str>) -> HttpRegistryClient {
    let config = RegistryConfig {
        request_timeout_secs: 5,
        min_request_interval_ms: 0,
        ..Default::default()
    };
    HttpRegistryClient::new(&config, token.map(str::to_string)).unwrap()
}

fn bin(text: &str) -> Bin {
    Bin::parse(text).unwrap()
}

fn energy_row(packed: &str, kwh: &str) -> serde_json::Value {
    json!({
        "nyc_building_identification": packed,
        "electricity_use_grid_purchase_1": kwh,
        "natural_gas_use_kbtu": "5000000",
        "office_gross_floor_area_ft": "100000",
        "year_built": "1931"
    })
}

#[tokio::test]
async fn test_geosearch_reads_first_feature() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/search"))
        .and(query_param("text", "350 5th Ave"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "properties": {
                        "label": "350 5 AVENUE, Manhattan, New York, NY, USA",
                        "confidence": 0.95,
                        "addendum": { "pad": { "bbl": "1008350041", "bin": "1015862" } }
                    }
                },
                {
                    "properties": {
                        "label": "350 5 AVENUE, Brooklyn, New York, NY, USA",
                        "confidence": 0.6,
                        "addendum": { "pad": { "bbl": "3010580001", "bin": "3020001" } }
                    }
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let geocoder = GeoSearchClient::new(client(None), format!("{}/v2/search", server.uri()));
    let found = geocoder.resolve("350 5th Ave").await.unwrap().unwrap();

    assert_eq!(found.candidate_key, Some(Bbl::parse("1008350041").unwrap()));
    assert_eq!(found.secondary_key, Some(bin("1015862")));
    assert_eq!(found.confidence, 0.95);
}

#[tokio::test]
async fn test_geosearch_empty_collection_is_no_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "features": [] })))
        .mount(&server)
        .await;

    let geocoder = GeoSearchClient::new(client(None), format!("{}/v2/search", server.uri()));

    assert!(geocoder.resolve("nowhere").await.unwrap().is_none());
}

#[tokio::test]
async fn test_energy_lookup_discards_substring_matches() {
    let server = MockServer::start().await;
    // 10158620 contains 1015862 as a substring but is a different building
    Mock::given(method("GET"))
        .and(path("/energy.json"))
        .and(header("X-App-Token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            energy_row("1015862000;2000001", "1"),
            energy_row("1000001;1015862", "10000000")
        ])))
        .mount(&server)
        .await;

    let registry = SocrataEnergyRegistry::new(client(Some("secret")), &server.uri(), "energy");
    let record = registry.lookup(&bin("1015862")).await.unwrap().unwrap();

    assert_eq!(record.matched_key, Some(bin("1015862")));
    assert_eq!(
        record.consumption.electricity_kwh,
        Some(rust_decimal::Decimal::from(10_000_000))
    );
}

#[tokio::test]
async fn test_energy_lookup_with_only_substring_matches_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/energy.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([energy_row("10158621", "1")])),
        )
        .mount(&server)
        .await;

    let registry = SocrataEnergyRegistry::new(client(None), &server.uri(), "energy");

    assert!(registry.lookup(&bin("1015862")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_structure_lookup_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lots.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let registry = SocrataStructureRegistry::new(client(None), &server.uri(), "lots");

    let found = registry
        .lookup(&Bbl::parse("1008350041").unwrap())
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_unavailable_registry_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let registry = SocrataStructureRegistry::new(client(None), &server.uri(), "lots");
    let err = registry
        .lookup(&Bbl::parse("1008350041").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::Transient(_)));
}

#[tokio::test]
async fn test_bad_request_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
        .mount(&server)
        .await;

    let registry = SocrataEnergyRegistry::new(client(None), &server.uri(), "energy");
    let err = registry.lookup(&bin("1015862")).await.unwrap_err();

    assert!(matches!(err, RegistryError::Permanent(_)));
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let registry = SocrataEnergyRegistry::new(client(None), &server.uri(), "energy");
    let err = registry.lookup(&bin("1015862")).await.unwrap_err();

    assert!(matches!(err, RegistryError::Malformed(_)));
}

#[tokio::test]
async fn test_transient_failures_recover_under_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/energy.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/energy.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([energy_row("1015862", "42")])),
        )
        .mount(&server)
        .await;

    let registry = SocrataEnergyRegistry::new(client(None), &server.uri(), "energy");
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    };
    let key = bin("1015862");

    let record = call_with_retry(names::ENERGY, &policy, || registry.lookup(&key))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        record.consumption.electricity_kwh,
        Some(rust_decimal::Decimal::from(42))
    );

    // A fresh server that never recovers exhausts the policy
    let down = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&down)
        .await;
    let registry = SocrataEnergyRegistry::new(client(None), &down.uri(), "energy");

    let err = call_with_retry(names::ENERGY, &policy, || registry.lookup(&key))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamTransient { .. }));
}
