//! Boundary parsing of loosely-typed registry values
//!
//! Registries deliver numbers as JSON strings, JSON numbers or CSV text, with
//! placeholders like `"Not Available"`. Everything is converted here, once,
//! into typed values. Decimals are always built from the textual form so no
//! binary float sits between the source and the first multiplication.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Placeholders that mean "no value"
const NULL_MARKERS: &[&str] = &["", "not available", "n/a", "na", "null", "none", "-"];

pub(crate) fn is_null_marker(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    NULL_MARKERS.contains(&lowered.as_str())
}

/// Parse a decimal from text, accepting thousands separators and exponents
pub fn decimal_from_text(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if is_null_marker(trimmed) {
        return None;
    }

    let cleaned: String = trimmed.chars().filter(|c| *c != ',').collect();

    if cleaned.contains(['e', 'E']) {
        return Decimal::from_scientific(&cleaned).ok();
    }
    Decimal::from_str(&cleaned).ok()
}

/// Decimal from a JSON string or number, via its text
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(text) => decimal_from_text(text),
        Value::Number(number) => decimal_from_text(&number.to_string()),
        _ => None,
    }
}

/// Whole number from JSON; `"1925.0"` is accepted, `"1925.5"` is not
pub fn integer_from_json(value: &Value) -> Option<i32> {
    let decimal = decimal_from_json(value)?;
    if decimal.fract() != Decimal::ZERO {
        return None;
    }
    decimal.to_i32()
}

/// Trimmed, non-placeholder text from a JSON string or number
pub fn text_from_json(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!is_null_marker(trimmed)).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Field lookup on a JSON object row
pub fn field<'a>(row: &'a serde_json::Map<String, Value>, name: &str) -> Option<&'a Value> {
    row.get(name).filter(|v| !v.is_null())
}
