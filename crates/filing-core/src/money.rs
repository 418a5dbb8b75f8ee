//! # Money
//!
//! Fixed-point currency. Every figure is an `i64` count of cents; there is
//! no binary floating point anywhere in the engine, so rendering the same
//! session twice can never drift by a rounding error.

use crate::error::{FilingError, FilingResult};
use crate::primitives::BASIS_POINTS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A signed amount of money in cents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole currency units, e.g. `Cents::dollars(12)` is 12.00.
    #[must_use]
    pub const fn dollars(units: i64) -> Self {
        Self(units.saturating_mul(100))
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    #[must_use]
    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Sum a sequence of amounts with saturating arithmetic.
    pub fn sum<I: IntoIterator<Item = Self>>(items: I) -> Self {
        items.into_iter().fold(Self::ZERO, Self::saturating_add)
    }

    /// `self / whole` expressed in basis points, rounded half away from zero.
    ///
    /// Returns `None` when `whole` is zero.
    #[must_use]
    pub fn ratio_bps(self, whole: Self) -> Option<i64> {
        if whole.0 == 0 {
            return None;
        }
        let num = i128::from(self.0) * BASIS_POINTS;
        let den = i128::from(whole.0);
        let quotient = num / den;
        let remainder = num % den;
        // Round half away from zero.
        let rounded = if remainder.abs() * 2 >= den.abs() {
            if (num < 0) != (den < 0) {
                quotient - 1
            } else {
                quotient + 1
            }
        } else {
            quotient
        };
        i64::try_from(rounded).ok()
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", magnitude / 100, magnitude % 100)
    }
}

impl FromStr for Cents {
    type Err = FilingError;

    /// Parse `"1234"`, `"1234.5"`, `"-1234.56"`. More than two fractional
    /// digits is rejected rather than rounded.
    fn from_str(raw: &str) -> FilingResult<Self> {
        let invalid = || FilingError::InvalidInput(format!("invalid amount {raw:?}"));
        let trimmed = raw.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = body.split_once('.').unwrap_or((body, ""));
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let units: i64 = whole.parse().map_err(|_| invalid())?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let magnitude = units
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(invalid)?;
        Ok(Self(if negative { -magnitude } else { magnitude }))
    }
}

// =============================================================================
// TESTS
// =============================================================================
