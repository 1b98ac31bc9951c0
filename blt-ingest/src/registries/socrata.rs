//! Socrata open-data adapters: energy benchmarking and tax-lot structure
//!
//! Both datasets return JSON arrays of flat objects whose values are mostly
//! strings. Rows are parsed into typed records here and nowhere else.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::http::HttpRegistryClient;
use super::{EnergyUsageRecord, EnergyUsageRegistry, StructureRecord, StructureRegistry};
use crate::error::RegistryResult;
use crate::keys::{Bbl, Bin, SecondaryKeys};
use crate::parse::{decimal_from_json, field, integer_from_json, text_from_json};
use crate::types::{Fuel, FuelConsumption, UseCategory};

type Row = Map<String, Value>;

/// Packed secondary-key column in the benchmarking dataset
const PACKED_KEY_FIELD: &str = "nyc_building_identification";

/// Latest-first ordering column in the benchmarking dataset
const ORDER_FIELD: &str = "last_modified_date_property";

/// Rows fetched per contains query; substring hits that are not real
/// members of the packed field are discarded
const CANDIDATE_ROWS: usize = 10;

const FUEL_FIELDS: [(&str, Fuel); 4] = [
    ("electricity_use_grid_purchase_1", Fuel::Electricity),
    ("natural_gas_use_kbtu", Fuel::NaturalGas),
    ("fuel_oil_2_use_kbtu", Fuel::FuelOil),
    ("district_steam_use_kbtu", Fuel::DistrictSteam),
];

/// Benchmarking floor-area columns → use category
///
/// Column names are truncated upstream; categories match the coefficient
/// table keys where one exists.
const FLOOR_AREA_FIELDS: [(&str, &str); 35] = [
    ("adult_education_gross_floor", "adult_education"),
    ("automobile_dealership_gross", "automobile_dealership"),
    ("bank_branch_gross_floor_area", "bank_branch"),
    ("barracks_gross_floor_area", "barracks"),
    ("college_university_gross", "college_university"),
    ("convention_center_gross_floor", "convention_center"),
    ("courthouse_gross_floor_area", "courthouse"),
    ("data_center_gross_floor_area", "data_center"),
    ("distribution_center_gross", "distribution_center"),
    ("enclosed_mall_gross_floor", "enclosed_mall"),
    ("energy_power_station_gross", "energy_power_station"),
    ("financial_office_gross_floor", "financial_office"),
    ("food_sales_gross_floor_area", "food_sales"),
    ("food_service_gross_floor", "food_service"),
    ("hotel_gross_floor_area_ft", "hotel"),
    ("k_12_school_gross_floor_area", "k_12_school"),
    ("laboratory_gross_floor_area", "laboratory"),
    ("medical_office_gross_floor", "medical_office"),
    ("movie_theater_gross_floor", "movie_theater"),
    ("multifamily_housing_gross", "multifamily_housing"),
    ("museum_gross_floor_area_ft", "museum"),
    ("office_gross_floor_area_ft", "office"),
    ("other_gross_floor_area_ft", "other"),
    ("parking_gross_floor_area", "parking"),
    ("performing_arts_gross_floor", "performing_arts"),
    ("pre_school_daycare_gross", "pre_school_daycare"),
    ("refrigerated_warehouse_gross", "refrigerated_warehouse"),
    ("restaurant_gross_floor_area", "restaurant"),
    ("retail_store_gross_floor", "retail_store"),
    ("self_storage_facility_gross", "self_storage_facility"),
    ("senior_living_community_gross", "senior_living_community"),
    ("social_meeting_hall_gross", "social_meeting_hall"),
    ("strip_mall_gross_floor_area", "strip_mall"),
    ("supermarket_grocery_gross", "supermarket_grocery_store"),
    ("worship_facility_gross_floor", "worship_facility"),
];

/// Parse one benchmarking row
pub fn parse_energy_row(row: &Row) -> EnergyUsageRecord {
    let mut consumption = FuelConsumption::default();
    for (column, fuel) in FUEL_FIELDS {
        consumption.set(fuel, field(row, column).and_then(decimal_from_json));
    }

    let floor_areas: BTreeMap<UseCategory, Decimal> = FLOOR_AREA_FIELDS
        .iter()
        .filter_map(|(column, category)| {
            let area = field(row, column).and_then(decimal_from_json)?;
            Some((UseCategory::new(*category), area))
        })
        .collect();

    let listed_keys = field(row, PACKED_KEY_FIELD)
        .and_then(text_from_json)
        .map(|packed| SecondaryKeys::parse_packed(&packed))
        .unwrap_or_default();

    EnergyUsageRecord {
        matched_key: None,
        listed_keys,
        consumption,
        floor_areas,
        year_built: field(row, "year_built").and_then(integer_from_json),
        property_type: field(row, "largest_property_use_type").and_then(text_from_json),
        gross_floor_area: field(row, "property_gfa_self_reported").and_then(decimal_from_json),
        site_eui: field(row, "site_eui_kbtu_ft").and_then(decimal_from_json),
        energy_star_score: field(row, "energy_star_score").and_then(integer_from_json),
    }
}

/// Parse one tax-lot row
pub fn parse_structure_row(row: &Row) -> StructureRecord {
    StructureRecord {
        address: field(row, "address").and_then(text_from_json),
        zip_code: field(row, "zipcode").and_then(text_from_json),
        year_built: field(row, "yearbuilt")
            .and_then(integer_from_json)
            .filter(|year| *year > 0),
        num_floors: field(row, "numfloors").and_then(decimal_from_json),
        building_area: field(row, "bldgarea").and_then(decimal_from_json),
        owner_name: field(row, "ownername").and_then(text_from_json),
    }
}

/// Energy benchmarking dataset adapter
pub struct SocrataEnergyRegistry {
    http: HttpRegistryClient,
    resource_url: String,
}

impl SocrataEnergyRegistry {
    pub fn new(http: HttpRegistryClient, base_url: &str, dataset: &str) -> Self {
        Self {
            http,
            resource_url: format!("{}/{}.json", base_url.trim_end_matches('/'), dataset),
        }
    }
}

#[async_trait]
impl EnergyUsageRegistry for SocrataEnergyRegistry {
    async fn lookup(&self, secondary_key: &Bin) -> RegistryResult<Option<EnergyUsageRecord>> {
        // Bin is digits only, so it is safe inside the SoQL literal
        let query = [
            (
                "$where",
                format!("{} like '%{}%'", PACKED_KEY_FIELD, secondary_key),
            ),
            ("$order", format!("{} DESC", ORDER_FIELD)),
            ("$limit", CANDIDATE_ROWS.to_string()),
        ];

        let rows: Option<Vec<Row>> = self.http.get_json(&self.resource_url, &query).await?;

        let record = rows.unwrap_or_default().iter().map(parse_energy_row).find(|record| {
            let member = record.listed_keys.contains(secondary_key);
            if !member {
                tracing::debug!(
                    bin = %secondary_key,
                    listed = ?record.listed_keys,
                    "Discarding substring-only benchmarking match"
                );
            }
            member
        });

        Ok(record.map(|mut record| {
            record.matched_key = Some(secondary_key.clone());
            record
        }))
    }
}

/// Tax-lot dataset adapter
pub struct SocrataStructureRegistry {
    http: HttpRegistryClient,
    resource_url: String,
}

impl SocrataStructureRegistry {
    pub fn new(http: HttpRegistryClient, base_url: &str, dataset: &str) -> Self {
        Self {
            http,
            resource_url: format!("{}/{}.json", base_url.trim_end_matches('/'), dataset),
        }
    }
}

#[async_trait]
impl StructureRegistry for SocrataStructureRegistry {
    async fn lookup(&self, key: &Bbl) -> RegistryResult<Option<StructureRecord>> {
        let query = [
            ("$where", format!("bbl='{}'", key)),
            ("$limit", "1".to_string()),
        ];

        let rows: Option<Vec<Row>> = self.http.get_json(&self.resource_url, &query).await?;

        Ok(rows
            .and_then(|rows| rows.into_iter().next())
            .map(|row| parse_structure_row(&row)))
    }
}
