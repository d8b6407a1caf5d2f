//! Value Objects for the storefront

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::EcommerceError;

/// Discount code value object. Codes are matched case-insensitively, so the
/// stored form is trimmed and uppercased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscountCode(String);

impl DiscountCode {
    pub fn new(value: impl Into<String>) -> Result<Self, DiscountCodeError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(DiscountCodeError::Empty); }
        if value.len() > 50 { return Err(DiscountCodeError::TooLong); }
        if value.chars().any(char::is_whitespace) { return Err(DiscountCodeError::Whitespace); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_inner(self) -> String { self.0 }
}

impl fmt::Display for DiscountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone)] pub enum DiscountCodeError { Empty, TooLong, Whitespace }
impl std::error::Error for DiscountCodeError {}
impl fmt::Display for DiscountCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Discount code is empty"),
            Self::TooLong => write!(f, "Discount code is too long"),
            Self::Whitespace => write!(f, "Discount code must not contain whitespace"),
        }
    }
}

impl From<DiscountCodeError> for EcommerceError {
    fn from(e: DiscountCodeError) -> Self { EcommerceError::Validation(e.to_string()) }
}

/// Human-readable sequential order number, rendered as `ORD-0001`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderNumber(i64);

impl OrderNumber {
    const PREFIX: &'static str = "ORD-";

    pub fn new(sequence: i64) -> Self { Self(sequence) }

    pub fn parse(value: &str) -> Option<Self> {
        value.strip_prefix(Self::PREFIX)?.parse().ok().map(Self)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}{:04}", Self::PREFIX, self.0) }
}

/// Trailing reporting window used by order and payment statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Timeframe {
    /// Start of the window ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = match self {
            Self::Day => now.checked_sub_days(Days::new(1)),
            Self::Week => now.checked_sub_days(Days::new(7)),
            Self::Month => now.checked_sub_months(Months::new(1)),
            Self::Year => now.checked_sub_months(Months::new(12)),
        };
        start.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Processor metadata attached to a payment.
///
/// A flat key/value map carrying a `schema_version` entry. Values supplied by
/// API callers must be scalars; nested structures are only written by the
/// service itself (gateway verification snapshots).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMetadata(BTreeMap<String, Value>);

impl PaymentMetadata {
    pub const SCHEMA_VERSION: u64 = 1;
    const VERSION_KEY: &'static str = "schema_version";

    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(Self::VERSION_KEY.to_string(), Value::from(Self::SCHEMA_VERSION));
        Self(entries)
    }

    /// Validates caller-supplied metadata. Must be a JSON object of scalars.
    pub fn from_client(value: Option<Value>) -> Result<Self, EcommerceError> {
        let mut metadata = Self::new();
        let Some(value) = value else { return Ok(metadata) };
        let Value::Object(map) = value else {
            return Err(EcommerceError::validation("metadata must be a JSON object"));
        };
        for (key, value) in map {
            if key.trim().is_empty() || key == Self::VERSION_KEY {
                return Err(EcommerceError::validation(format!("metadata key '{key}' is not allowed")));
            }
            if value.is_object() || value.is_array() {
                return Err(EcommerceError::validation(format!("metadata value for '{key}' must be a scalar")));
            }
            metadata.0.insert(key, value);
        }
        Ok(metadata)
    }

    pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Default for PaymentMetadata { fn default() -> Self { Self::new() } }
