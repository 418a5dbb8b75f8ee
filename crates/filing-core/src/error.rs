//! # Errors
//!
//! Every failure the engine reports is a typed, expected outcome. Only
//! [`FilingError::Storage`] means the durable store could not be reached,
//! and even then no partial write is ever visible: commits are atomic.

use crate::types::{FieldKey, SessionId, UserId};
use crate::workflow::FilingState;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type FilingResult<T> = Result<T, FilingError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilingError {
    /// The requested transition is not in the table for the current state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: FilingState, to: FilingState },

    /// The request was built against an outdated step counter.
    #[error("stale transition: expected step {expected}, session is at step {actual}")]
    StaleTransition { expected: u64, actual: u64 },

    /// The transition is declared but its precondition does not hold.
    #[error("precondition failed for {from} -> {to}: {reason}")]
    PreconditionFailed {
        from: FilingState,
        to: FilingState,
        reason: String,
    },

    /// Extraction failed more often than the retry budget allows.
    #[error("retry budget exhausted after {attempts} recoverable failures (budget {budget})")]
    RetryBudgetExhausted { attempts: u32, budget: u32 },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session already exists: {0}")]
    SessionExists(SessionId),

    /// An abandoned session has no recovery path.
    #[error("session {0} is abandoned")]
    SessionAbandoned(SessionId),

    /// A report view needs at least one computed tax result.
    #[error("insufficient data to render a view; missing any of: {}", join_keys(.missing))]
    InsufficientData { missing: Vec<FieldKey> },

    #[error("invalid transfer target: {0}")]
    TargetInvalid(String),

    #[error("session is already owned by {owner}")]
    AlreadyOwned { owner: UserId },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The durable store could not be reached or failed to commit.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl FilingError {
    /// Stable machine-readable code for API payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::StaleTransition { .. } => "stale_transition",
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExists(_) => "session_exists",
            Self::SessionAbandoned(_) => "session_abandoned",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::TargetInvalid(_) => "target_invalid",
            Self::AlreadyOwned { .. } => "already_owned",
            Self::InvalidInput(_) => "invalid_input",
            Self::Storage(_) => "storage_unavailable",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller can recover by re-reading the session and retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleTransition { .. } | Self::InvalidTransition { .. }
        )
    }
}

fn join_keys(keys: &[FieldKey]) -> String {
    keys.iter()
        .map(FieldKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map any redb error into [`FilingError::Storage`].
pub(crate) fn storage<E: Into<redb::Error>>(err: E) -> FilingError {
    FilingError::Storage(err.into().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
