//! Building keys and references
//!
//! The canonical key is a 10-digit borough-block-lot composite:
//! - Digit 1: borough (1=Manhattan, 2=Bronx, 3=Brooklyn, 4=Queens, 5=Staten Island)
//! - Digits 2-6: block, zero-padded
//! - Digits 7-10: lot, zero-padded
//!
//! Secondary keys are structure identifiers. Upstream systems pack several of
//! them into one delimited field; [`SecondaryKeys::parse_packed`] is the only
//! place that unpacks them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Key parsing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("expected 10 digits, got '{0}'")]
    WrongLength(String),

    #[error("non-digit characters in '{0}'")]
    NonDigit(String),

    #[error("borough digit must be 1-5 in '{0}'")]
    InvalidBorough(String),

    #[error("empty building reference")]
    Empty,
}

/// Canonical building key (10-digit BBL)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bbl(String);

impl Bbl {
    /// Parse plain (`1011190036`) or dashed (`1-01119-0036`) form
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }

        let compact: String = trimmed.chars().filter(|c| *c != '-').collect();

        if !compact.chars().all(|c| c.is_ascii_digit()) {
            return Err(KeyError::NonDigit(trimmed.to_string()));
        }
        if compact.len() != 10 {
            return Err(KeyError::WrongLength(trimmed.to_string()));
        }
        if !matches!(compact.as_bytes()[0], b'1'..=b'5') {
            return Err(KeyError::InvalidBorough(trimmed.to_string()));
        }

        Ok(Self(compact))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn borough(&self) -> u8 {
        self.0.as_bytes()[0] - b'0'
    }

    pub fn block(&self) -> &str {
        &self.0[1..6]
    }

    pub fn lot(&self) -> &str {
        &self.0[6..]
    }

    /// `B-BBBBB-LLLL`, the form used by finance-department lookups
    pub fn dashed(&self) -> String {
        format!("{}-{}-{}", &self.0[..1], self.block(), self.lot())
    }

    pub fn borough_name(&self) -> &'static str {
        match self.borough() {
            1 => "Manhattan",
            2 => "Bronx",
            3 => "Brooklyn",
            4 => "Queens",
            5 => "Staten Island",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for Bbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Bbl {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Bbl::parse(&value)
    }
}

impl From<Bbl> for String {
    fn from(value: Bbl) -> Self {
        value.0
    }
}

/// Secondary key (building identification number)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bin(String);

impl Bin {
    /// Accepts digits only; spreadsheet exports sometimes append `.0`
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Bin {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Bin::parse(&value).ok_or(KeyError::NonDigit(value))
    }
}

impl From<Bin> for String {
    fn from(value: Bin) -> Self {
        value.0
    }
}

/// Ordered, de-duplicated set of secondary keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecondaryKeys(Vec<Bin>);

impl SecondaryKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a packed field such as `"1001234; 1001235,1001236"`
    pub fn parse_packed(packed: &str) -> Self {
        let mut keys = Self::new();
        for token in packed.split(|c: char| c == ';' || c == ',' || c == '|' || c.is_whitespace()) {
            if let Some(bin) = Bin::parse(token) {
                keys.insert(bin);
            }
        }
        keys
    }

    /// Insert preserving first-seen order
    pub fn insert(&mut self, bin: Bin) -> bool {
        if self.0.contains(&bin) {
            return false;
        }
        self.0.push(bin);
        true
    }

    pub fn extend(&mut self, other: &SecondaryKeys) {
        for bin in other.iter() {
            self.insert(bin.clone());
        }
    }

    pub fn contains(&self, bin: &Bin) -> bool {
        self.0.contains(bin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bin> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Bin> for SecondaryKeys {
    fn from_iter<I: IntoIterator<Item = Bin>>(iter: I) -> Self {
        let mut keys = Self::new();
        for bin in iter {
            keys.insert(bin);
        }
        keys
    }
}

/// A caller's building reference: a canonical key or free-text address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildingRef {
    Key(Bbl),
    Address(String),
}

impl BuildingRef {
    /// Digit-and-dash input must be a valid key; anything with letters is an address
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }

        let key_like = trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c.is_whitespace());

        if key_like {
            let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
            return Bbl::parse(&compact).map(BuildingRef::Key);
        }

        if !trimmed.chars().any(|c| c.is_alphabetic()) {
            return Err(KeyError::NonDigit(trimmed.to_string()));
        }

        let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(BuildingRef::Address(collapsed))
    }
}

impl fmt::Display for BuildingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildingRef::Key(key) => write!(f, "{}", key),
            BuildingRef::Address(address) => f.write_str(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbl_plain_and_dashed() {
        let plain = Bbl::parse("1011190036").unwrap();
        let dashed = Bbl::parse("1-01119-0036").unwrap();
        assert_eq!(plain, dashed);
        assert_eq!(plain.dashed(), "1-01119-0036");
        assert_eq!(plain.block(), "01119");
        assert_eq!(plain.lot(), "0036");
        assert_eq!(plain.borough_name(), "Manhattan");
    }

    #[test]
    fn test_bbl_rejects_malformed() {
        assert_eq!(Bbl::parse(""), Err(KeyError::Empty));
        assert!(matches!(Bbl::parse("101119003"), Err(KeyError::WrongLength(_))));
        assert!(matches!(Bbl::parse("6011190036"), Err(KeyError::InvalidBorough(_))));
        assert!(matches!(Bbl::parse("0011190036"), Err(KeyError::InvalidBorough(_))));
        assert!(matches!(Bbl::parse("10111900AB"), Err(KeyError::NonDigit(_))));
    }

    #[test]
    fn test_bbl_serde_validates() {
        let key: Bbl = serde_json::from_str("\"3000010001\"").unwrap();
        assert_eq!(key.borough_name(), "Brooklyn");
        assert!(serde_json::from_str::<Bbl>("\"9000010001\"").is_err());
    }

    #[test]
    fn test_packed_secondary_keys() {
        let keys = SecondaryKeys::parse_packed("1001234; 1001235,1001234 | 1001236.0, n/a");
        let values: Vec<&str> = keys.iter().map(|b| b.as_str()).collect();
        assert_eq!(values, vec!["1001234", "1001235", "1001236"]);
    }

    #[test]
    fn test_building_ref_forms() {
        assert_eq!(
            BuildingRef::parse(" 1-01119-0036 ").unwrap(),
            BuildingRef::Key(Bbl::parse("1011190036").unwrap())
        );
        assert_eq!(
            BuildingRef::parse("350  Fifth   Avenue").unwrap(),
            BuildingRef::Address("350 Fifth Avenue".to_string())
        );
        assert!(BuildingRef::parse("12345").is_err());
        assert!(BuildingRef::parse("   ").is_err());
        assert!(BuildingRef::parse("#$%").is_err());
    }
}
