//! # Core Types
//!
//! Identifiers and small value types shared by every module.
//!
//! Identifiers validate on construction and on deserialization, so a value
//! of one of these types is always well formed.

use crate::error::{FilingError, FilingResult};
use crate::primitives::{MAX_FIELD_KEY_LEN, MAX_ID_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// IDENTIFIERS
// =============================================================================

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '|')
}

fn validate_id(kind: &str, raw: &str) -> FilingResult<()> {
    if raw.is_empty() || raw.len() > MAX_ID_LEN {
        return Err(FilingError::InvalidInput(format!(
            "{kind} length {} out of valid range 1..={MAX_ID_LEN}",
            raw.len()
        )));
    }
    if let Some(bad) = raw.chars().find(|c| !is_id_char(*c)) {
        return Err(FilingError::InvalidInput(format!(
            "{kind} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier.
            pub fn new(raw: impl Into<String>) -> FilingResult<Self> {
                let raw = raw.into();
                validate_id($kind, &raw)?;
                Ok(Self(raw))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = FilingError;

            fn try_from(raw: String) -> FilingResult<Self> {
                Self::new(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = FilingError;

            fn from_str(s: &str) -> FilingResult<Self> {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier of a filing session, stable for its lifetime.
    SessionId,
    "session id"
);

string_id!(
    /// An authenticated identity as issued by the upstream identity provider.
    UserId,
    "user id"
);

string_id!(
    /// Reference to the tax return entity created from a session.
    ReturnId,
    "return id"
);

impl SessionId {
    /// Sequential identifier used when the caller does not supply one.
    #[must_use]
    pub fn sequential(seq: u64) -> Self {
        Self(format!("fs-{seq:012}"))
    }
}

// =============================================================================
// FIELD KEY
// =============================================================================

/// Name of one field in a session's field set (`snake_case` ASCII).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(raw: impl Into<String>) -> FilingResult<Self> {
        let raw = raw.into();
        let valid_len = !raw.is_empty() && raw.len() <= MAX_FIELD_KEY_LEN;
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_len || !valid_chars {
            return Err(FilingError::InvalidInput(format!(
                "field key {raw:?} must be 1..={MAX_FIELD_KEY_LEN} chars of [a-z0-9_]"
            )));
        }
        Ok(Self(raw))
    }

    /// Build a key from one of the canonical constants in [`crate::fields`].
    #[must_use]
    pub fn from_static(raw: &'static str) -> Self {
        Self(raw.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FieldKey {
    type Error = FilingError;

    fn try_from(raw: String) -> FilingResult<Self> {
        Self::new(raw)
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.0
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Milliseconds since the Unix epoch, as supplied by a [`crate::Clock`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    #[must_use]
    pub fn millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed between `earlier` and `self`, zero if reversed.
    #[must_use]
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// OWNERSHIP
// =============================================================================

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Anonymous,
    User(UserId),
}

impl Ownership {
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Anonymous => None,
            Self::User(id) => Some(id),
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl From<Option<UserId>> for Ownership {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Self::Anonymous, Self::User)
    }
}

// =============================================================================
// DOCUMENT REFERENCE
// =============================================================================

/// An uploaded input artifact. The bytes live elsewhere; the session only
/// keeps the name and a content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub digest: String,
}

impl DocumentRef {
    #[must_use]
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
