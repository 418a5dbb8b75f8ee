//! # Primitives
//!
//! Bounds and defaults shared across the engine.

/// Recoverable extraction failures a session may accumulate before the
/// next failure is refused.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Idle time (milliseconds) after which a non-terminal session is abandoned
/// by the inactivity sweep. 24 hours.
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Maximum byte length of a session, user or return identifier.
pub const MAX_ID_LEN: usize = 128;

/// Maximum byte length of a field key.
pub const MAX_FIELD_KEY_LEN: usize = 64;

/// Maximum byte length of a text field value.
pub const MAX_TEXT_VALUE_LEN: usize = 4096;

/// Maximum number of documents attached to one session.
pub const MAX_DOCUMENTS: usize = 256;

/// Number of digest bytes kept in an idempotency key (128 bits).
pub const IDEMPOTENCY_KEY_BYTES: usize = 16;

/// Basis points in one whole (100%).
pub const BASIS_POINTS: i128 = 10_000;
