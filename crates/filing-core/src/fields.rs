//! # Fields
//!
//! A session's data is a flat, ordered map of field keys to values. The
//! upstream extraction collaborator supplies it; the engine never interprets
//! more than the canonical keys below.

use crate::error::{FilingError, FilingResult};
use crate::money::Cents;
use crate::primitives::MAX_TEXT_VALUE_LEN;
use crate::types::FieldKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// CANONICAL KEYS
// =============================================================================

pub const FILING_STATUS: &str = "filing_status";
pub const WAGE_INCOME: &str = "wage_income";
pub const INTEREST_INCOME: &str = "interest_income";
pub const DIVIDEND_INCOME: &str = "dividend_income";
pub const RENTAL_INCOME: &str = "rental_income";
pub const DEDUCTION_TOTAL: &str = "deduction_total";
pub const CREDIT_TOTAL: &str = "credit_total";
pub const WITHHOLDING_TOTAL: &str = "withholding_total";

/// Computed tax results. A report view needs at least one of these.
pub const TOTAL_INCOME: &str = "total_income";
pub const TAXABLE_INCOME: &str = "taxable_income";
pub const TOTAL_TAX: &str = "total_tax";

/// Keys that count as computed tax results, in report order.
pub const COMPUTED_RESULT_KEYS: [&str; 3] = [TOTAL_INCOME, TAXABLE_INCOME, TOTAL_TAX];

// =============================================================================
// FIELD VALUE
// =============================================================================

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Amount(Cents),
    Text(String),
    Flag(bool),
}

impl FieldValue {
    #[must_use]
    pub fn as_amount(&self) -> Option<Cents> {
        match self {
            Self::Amount(c) => Some(*c),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn validate(&self) -> FilingResult<()> {
        match self {
            Self::Text(t) if t.len() > MAX_TEXT_VALUE_LEN => Err(FilingError::InvalidInput(
                format!("text value of {} bytes exceeds {MAX_TEXT_VALUE_LEN}", t.len()),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amount(c) => write!(f, "{c}"),
            Self::Text(t) => f.write_str(t),
            Self::Flag(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
        }
    }
}

// =============================================================================
// FIELD SET
// =============================================================================

/// The full field snapshot of a session, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet(BTreeMap<FieldKey, FieldValue>);

impl FieldSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. Returns the previous value.
    pub fn insert(&mut self, key: FieldKey, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(key, value)
    }

    /// Builder-style insert, for fixtures and tests.
    #[must_use]
    pub fn with(mut self, key: &'static str, value: FieldValue) -> Self {
        self.0.insert(FieldKey::from_static(key), value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &FieldKey) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Look up a canonical key.
    #[must_use]
    pub fn get_static(&self, key: &'static str) -> Option<&FieldValue> {
        self.0.get(&FieldKey::from_static(key))
    }

    #[must_use]
    pub fn amount(&self, key: &'static str) -> Option<Cents> {
        self.get_static(key).and_then(FieldValue::as_amount)
    }

    #[must_use]
    pub fn contains(&self, key: &'static str) -> bool {
        self.get_static(key).is_some()
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn merge(&mut self, other: &FieldSet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &FieldValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.0.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate every value.
    pub fn validate(&self) -> FilingResult<()> {
        self.0.values().try_for_each(FieldValue::validate)
    }

    /// The computed tax result keys present in this set.
    #[must_use]
    pub fn computed_results(&self) -> Vec<FieldKey> {
        COMPUTED_RESULT_KEYS
            .iter()
            .copied()
            .filter(|&k| self.contains(k))
            .map(FieldKey::from_static)
            .collect()
    }
}

impl FromIterator<(FieldKey, FieldValue)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (FieldKey, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
