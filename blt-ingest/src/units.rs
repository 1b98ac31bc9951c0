//! Energy unit conversions
//!
//! Benchmarking data reports electricity in kWh and every other fuel in kBtu;
//! audit and narrative consumers want the billing units back.

use rust_decimal::Decimal;

/// kBtu per kWh
pub fn kbtu_per_kwh() -> Decimal {
    Decimal::new(3412, 3)
}

/// kBtu per therm of natural gas
pub fn kbtu_per_therm() -> Decimal {
    Decimal::from(100)
}

/// kBtu per gallon of #2 fuel oil
pub fn kbtu_per_gallon_fuel_oil() -> Decimal {
    Decimal::new(1385, 1)
}

/// kBtu per thousand pounds of district steam
pub fn kbtu_per_mlb_steam() -> Decimal {
    Decimal::from(1194)
}

pub fn kwh_to_kbtu(kwh: Decimal) -> Decimal {
    kwh * kbtu_per_kwh()
}

pub fn kbtu_to_therms(kbtu: Decimal) -> Decimal {
    kbtu / kbtu_per_therm()
}

pub fn kbtu_to_gallons_fuel_oil(kbtu: Decimal) -> Decimal {
    kbtu / kbtu_per_gallon_fuel_oil()
}

pub fn kbtu_to_mlb_steam(kbtu: Decimal) -> Decimal {
    kbtu / kbtu_per_mlb_steam()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(kwh_to_kbtu(Decimal::from(1000)), Decimal::from(3412));
        assert_eq!(kbtu_to_therms(Decimal::from(5_000_000)), Decimal::from(50_000));
        assert_eq!(kbtu_to_gallons_fuel_oil(Decimal::from(277)), Decimal::from(2));
        assert_eq!(kbtu_to_mlb_steam(Decimal::from(11940)), Decimal::from(10));
    }
}
