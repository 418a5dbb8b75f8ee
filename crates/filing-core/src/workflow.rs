//! # Workflow
//!
//! The filing state machine: states, triggers and the transition tables.
//!
//! ```text
//!  UPLOAD ──► EXTRACT ──► VALIDATE ──► REVIEW ──► COMPLETE
//!    ▲           │  ▲          │  ▲         │
//!    └───────────┘  └──────────┘  └─────────┘
//!   (extraction   (validation   (taxpayer
//!    failed)       failed)       edits)
//!
//!  any non-terminal state ──► ABANDONED
//! ```
//!
//! Which edges exist depends on the [`WorkflowType`]; the table is selected
//! by the variant, never by conditionals scattered through callers.

use crate::fields::{FieldSet, FieldValue};
use crate::error::{FilingError, FilingResult};
use crate::types::{DocumentRef, FieldKey, ReturnId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// STATES
// =============================================================================

/// Position of a session in the filing workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilingState {
    Upload,
    Extract,
    Validate,
    Review,
    Complete,
    Abandoned,
}

impl FilingState {
    /// All declared states, in workflow order.
    pub const ALL: [FilingState; 6] = [
        Self::Upload,
        Self::Extract,
        Self::Validate,
        Self::Review,
        Self::Complete,
        Self::Abandoned,
    ];

    /// `COMPLETE` and `ABANDONED` accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Abandoned)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD",
            Self::Extract => "EXTRACT",
            Self::Validate => "VALIDATE",
            Self::Review => "REVIEW",
            Self::Complete => "COMPLETE",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for FilingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// WORKFLOW TYPE
// =============================================================================

/// Workflow classification, fixed when the session is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Full workflow with re-extraction and review-edit loops.
    #[default]
    Unified,
    /// Straight-through workflow: no loops back from VALIDATE or REVIEW.
    Express,
}

/// One declared edge of a transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: FilingState,
    pub trigger: TriggerKind,
    pub to: FilingState,
}

const fn edge(from: FilingState, trigger: TriggerKind, to: FilingState) -> Edge {
    Edge { from, trigger, to }
}

use FilingState as S;
use TriggerKind as K;

const UNIFIED_TABLE: &[Edge] = &[
    edge(S::Upload, K::DocumentsSubmitted, S::Extract),
    edge(S::Extract, K::ExtractionCompleted, S::Validate),
    edge(S::Extract, K::ExtractionFailed, S::Upload),
    edge(S::Validate, K::ValidationPassed, S::Review),
    edge(S::Validate, K::ValidationFailed, S::Extract),
    edge(S::Review, K::TaxpayerConfirmed, S::Complete),
    edge(S::Review, K::FieldEdited, S::Validate),
];

const EXPRESS_TABLE: &[Edge] = &[
    edge(S::Upload, K::DocumentsSubmitted, S::Extract),
    edge(S::Extract, K::ExtractionCompleted, S::Validate),
    edge(S::Extract, K::ExtractionFailed, S::Upload),
    edge(S::Validate, K::ValidationPassed, S::Review),
    edge(S::Review, K::TaxpayerConfirmed, S::Complete),
];

impl WorkflowType {
    /// The declared edges for this workflow, excluding the implicit
    /// `any non-terminal → ABANDONED` edge.
    #[must_use]
    pub fn table(self) -> &'static [Edge] {
        match self {
            Self::Unified => UNIFIED_TABLE,
            Self::Express => EXPRESS_TABLE,
        }
    }

    /// Resolve the target of `trigger` fired in state `from`.
    ///
    /// Fails with [`FilingError::InvalidTransition`] naming the current
    /// state and the requested target when no edge matches.
    pub fn resolve(self, from: FilingState, trigger: TriggerKind) -> FilingResult<FilingState> {
        let to = trigger.target();
        if trigger == TriggerKind::Abandon {
            return if from.is_terminal() {
                Err(FilingError::InvalidTransition { from, to })
            } else {
                Ok(to)
            };
        }
        self.table()
            .iter()
            .find(|e| e.from == from && e.trigger == trigger)
            .map(|e| e.to)
            .ok_or(FilingError::InvalidTransition { from, to })
    }

    /// Whether any edge leads from `from` to `to`.
    #[must_use]
    pub fn allows(self, from: FilingState, to: FilingState) -> bool {
        if to == FilingState::Abandoned {
            return !from.is_terminal();
        }
        self.table().iter().any(|e| e.from == from && e.to == to)
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unified => "unified",
            Self::Express => "express",
        })
    }
}

// =============================================================================
// TRIGGERS
// =============================================================================

/// Why a session was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The taxpayer exited explicitly.
    Cancelled,
    /// The inactivity sweep timed the session out.
    InactivityTimeout,
}

/// A problem reported by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub field: Option<FieldKey>,
    pub message: String,
    /// A fatal issue means no structured profile was produced.
    #[serde(default)]
    pub fatal: bool,
}

/// A problem reported by the validation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: Option<FieldKey>,
    pub message: String,
    /// Blocking issues prevent the session from reaching review.
    #[serde(default)]
    pub blocking: bool,
}

/// The event that drives a transition, with the data it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    DocumentsSubmitted {
        documents: Vec<DocumentRef>,
    },
    ExtractionCompleted {
        fields: FieldSet,
        #[serde(default)]
        issues: Vec<ParseIssue>,
    },
    ExtractionFailed {
        reason: String,
    },
    ValidationPassed {
        #[serde(default)]
        computed: FieldSet,
        #[serde(default)]
        issues: Vec<ValidationIssue>,
    },
    ValidationFailed {
        issues: Vec<ValidationIssue>,
    },
    TaxpayerConfirmed {
        acknowledged: BTreeSet<FieldKey>,
        #[serde(default)]
        return_id: Option<ReturnId>,
    },
    FieldEdited {
        field: FieldKey,
        value: FieldValue,
    },
    Abandon {
        reason: AbandonReason,
    },
}

impl Trigger {
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::DocumentsSubmitted { .. } => TriggerKind::DocumentsSubmitted,
            Self::ExtractionCompleted { .. } => TriggerKind::ExtractionCompleted,
            Self::ExtractionFailed { .. } => TriggerKind::ExtractionFailed,
            Self::ValidationPassed { .. } => TriggerKind::ValidationPassed,
            Self::ValidationFailed { .. } => TriggerKind::ValidationFailed,
            Self::TaxpayerConfirmed { .. } => TriggerKind::TaxpayerConfirmed,
            Self::FieldEdited { .. } => TriggerKind::FieldEdited,
            Self::Abandon { .. } => TriggerKind::Abandon,
        }
    }
}

/// Payload-free discriminant of a [`Trigger`], kept in the audit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    DocumentsSubmitted,
    ExtractionCompleted,
    ExtractionFailed,
    ValidationPassed,
    ValidationFailed,
    TaxpayerConfirmed,
    FieldEdited,
    Abandon,
}

impl TriggerKind {
    /// The state this trigger leads to.
    #[must_use]
    pub fn target(self) -> FilingState {
        match self {
            Self::DocumentsSubmitted | Self::ValidationFailed => FilingState::Extract,
            Self::ExtractionCompleted | Self::FieldEdited => FilingState::Validate,
            Self::ExtractionFailed => FilingState::Upload,
            Self::ValidationPassed => FilingState::Review,
            Self::TaxpayerConfirmed => FilingState::Complete,
            Self::Abandon => FilingState::Abandoned,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentsSubmitted => "documents_submitted",
            Self::ExtractionCompleted => "extraction_completed",
            Self::ExtractionFailed => "extraction_failed",
            Self::ValidationPassed => "validation_passed",
            Self::ValidationFailed => "validation_failed",
            Self::TaxpayerConfirmed => "taxpayer_confirmed",
            Self::FieldEdited => "field_edited",
            Self::Abandon => "abandon",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_edge_matches_trigger_target() {
        for workflow in [WorkflowType::Unified, WorkflowType::Express] {
            for e in workflow.table() {
                assert_eq!(e.trigger.target(), e.to, "{:?}", e);
                assert!(!e.from.is_terminal());
            }
        }
    }

    #[test]
    fn resolve_follows_unified_table() {
        let wf = WorkflowType::Unified;
        assert_eq!(
            wf.resolve(S::Upload, K::DocumentsSubmitted),
            Ok(S::Extract)
        );
        assert_eq!(wf.resolve(S::Review, K::FieldEdited), Ok(S::Validate));
        assert_eq!(
            wf.resolve(S::Upload, K::TaxpayerConfirmed),
            Err(FilingError::InvalidTransition {
                from: S::Upload,
                to: S::Complete
            })
        );
    }

    #[test]
    fn express_has_no_review_loop() {
        let wf = WorkflowType::Express;
        assert!(wf.resolve(S::Review, K::FieldEdited).is_err());
        assert!(wf.resolve(S::Validate, K::ValidationFailed).is_err());
        assert!(wf.resolve(S::Review, K::TaxpayerConfirmed).is_ok());
    }

    #[test]
    fn abandon_only_from_non_terminal() {
        for state in FilingState::ALL {
            let result = WorkflowType::Unified.resolve(state, K::Abandon);
            assert_eq!(result.is_ok(), !state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for workflow in [WorkflowType::Unified, WorkflowType::Express] {
            for to in FilingState::ALL {
                assert!(!workflow.allows(S::Complete, to));
                assert!(!workflow.allows(S::Abandoned, to));
            }
        }
    }

    #[test]
    fn trigger_json_is_tagged() {
        let trigger = Trigger::Abandon {
            reason: AbandonReason::Cancelled,
        };
        let json = serde_json::to_string(&trigger).expect("serialize");
        assert_eq!(json, r#"{"type":"abandon","reason":"cancelled"}"#);
    }
}
