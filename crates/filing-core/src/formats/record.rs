//! Versioned record encoding: a 4-byte magic, a format version byte, a
//! record-kind byte, then the postcard body.
//!
//! ```text
//! ┌──────────┬─────────┬──────┬──────────────────┐
//! │ "FSR\0"  │ version │ kind │ postcard payload │
//! └──────────┴─────────┴──────┴──────────────────┘
//! ```

use crate::error::{FilingError, FilingResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Magic bytes prefixed to every stored record.
pub const RECORD_MAGIC: [u8; 4] = *b"FSR\0";

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

const HEADER_LEN: usize = RECORD_MAGIC.len() + 2;

/// What a stored record holds. Decoding checks it so a row from one table
/// can never be read as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Session = 1,
    Transition = 2,
    Transfer = 3,
}

impl RecordKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Session),
            2 => Some(Self::Transition),
            3 => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// Encode `value` as a record of `kind`.
pub fn encode_record<T: Serialize>(kind: RecordKind, value: &T) -> FilingResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&RECORD_MAGIC);
    out.push(RECORD_VERSION);
    out.push(kind as u8);
    postcard::to_extend(value, out).map_err(|e| FilingError::Serialization(e.to_string()))
}

/// Decode a record, checking magic, version and kind.
pub fn decode_record<T: DeserializeOwned>(kind: RecordKind, bytes: &[u8]) -> FilingResult<T> {
    if bytes.len() < HEADER_LEN {
        return Err(FilingError::Serialization(format!(
            "record too short: {} bytes",
            bytes.len()
        )));
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    if header[..RECORD_MAGIC.len()] != RECORD_MAGIC {
        return Err(FilingError::Serialization("bad record magic".into()));
    }
    let version = header[RECORD_MAGIC.len()];
    if version != RECORD_VERSION {
        return Err(FilingError::Serialization(format!(
            "unsupported record version {version}"
        )));
    }
    let found = header[RECORD_MAGIC.len() + 1];
    if RecordKind::from_byte(found) != Some(kind) {
        return Err(FilingError::Serialization(format!(
            "expected {kind:?} record, found kind byte {found}"
        )));
    }
    postcard::from_bytes(body).map_err(|e| FilingError::Serialization(e.to_string()))
}
