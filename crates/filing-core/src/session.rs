//! # Session
//!
//! The session record and the pure transition function.
//!
//! [`Session::apply`] never touches storage: it takes the stored snapshot
//! and a trigger and returns the next snapshot plus the audit record, or an
//! error with the input untouched. The store wraps it in a single write
//! transaction, which is what makes a transition all-or-nothing.

use crate::error::{FilingError, FilingResult};
use crate::fields::FieldSet;
use crate::primitives::{IDEMPOTENCY_KEY_BYTES, MAX_DOCUMENTS};
use crate::types::{DocumentRef, FieldKey, Ownership, ReturnId, SessionId, Timestamp, UserId};
use crate::workflow::{AbandonReason, FilingState, Trigger, TriggerKind, WorkflowType};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// SESSION
// =============================================================================

/// One taxpayer's filing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: Ownership,
    pub workflow: WorkflowType,
    pub state: FilingState,
    /// Number of committed transitions. Requests must quote it.
    pub step: u64,
    pub documents: Vec<DocumentRef>,
    pub fields: FieldSet,
    /// Computed fields the taxpayer must acknowledge before confirming.
    pub review_required: BTreeSet<FieldKey>,
    pub extraction_failures: u32,
    pub return_id: Option<ReturnId>,
    pub abandon_reason: Option<AbandonReason>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Session {
    /// A fresh session in `UPLOAD` at step 0.
    #[must_use]
    pub fn new(id: SessionId, owner: Ownership, workflow: WorkflowType, now: Timestamp) -> Self {
        Self {
            id,
            owner,
            workflow,
            state: FilingState::Upload,
            step: 0,
            documents: Vec::new(),
            fields: FieldSet::new(),
            review_required: BTreeSet::new(),
            extraction_failures: 0,
            return_id: None,
            abandon_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.owner.user_id()
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.owner.is_anonymous()
    }

    /// Terminal sessions are archived: kept, read-only, never deleted.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply `trigger` to this snapshot.
    ///
    /// Returns the next snapshot and the audit record. Checks the workflow
    /// table first (`InvalidTransition`), then the edge's precondition
    /// (`PreconditionFailed` / `RetryBudgetExhausted`). On error `self` is
    /// left as it was.
    pub fn apply(
        &self,
        trigger: &Trigger,
        now: Timestamp,
        retry_budget: u32,
    ) -> FilingResult<(Session, TransitionRecord)> {
        let from = self.state;
        let to = self.workflow.resolve(from, trigger.kind())?;
        let precondition = |reason: String| FilingError::PreconditionFailed { from, to, reason };

        let mut next = self.clone();
        match trigger {
            Trigger::DocumentsSubmitted { documents } => {
                if documents.is_empty() {
                    return Err(precondition("at least one document is required".into()));
                }
                if documents.iter().any(|d| d.name.trim().is_empty()) {
                    return Err(precondition("document names must not be empty".into()));
                }
                if next.documents.len().saturating_add(documents.len()) > MAX_DOCUMENTS {
                    return Err(precondition(format!(
                        "a session holds at most {MAX_DOCUMENTS} documents"
                    )));
                }
                next.documents.extend(documents.iter().cloned());
            }
            Trigger::ExtractionCompleted { fields, issues } => {
                if let Some(fatal) = issues.iter().find(|i| i.fatal) {
                    return Err(precondition(format!(
                        "extraction reported a fatal parse error: {}",
                        fatal.message
                    )));
                }
                if fields.is_empty() {
                    return Err(precondition("extraction produced no structured profile".into()));
                }
                fields.validate()?;
                next.fields.merge(fields);
                // The budget covers one extraction round.
                next.extraction_failures = 0;
            }
            Trigger::ExtractionFailed { .. } => {
                if self.extraction_failures >= retry_budget {
                    return Err(FilingError::RetryBudgetExhausted {
                        attempts: self.extraction_failures,
                        budget: retry_budget,
                    });
                }
                next.extraction_failures = self.extraction_failures.saturating_add(1);
            }
            Trigger::ValidationPassed { computed, issues } => {
                if let Some(blocking) = issues.iter().find(|i| i.blocking) {
                    return Err(precondition(format!(
                        "blocking validation error: {}",
                        blocking.message
                    )));
                }
                computed.validate()?;
                next.fields.merge(computed);
                next.review_required = computed.keys().cloned().collect();
            }
            Trigger::ValidationFailed { issues } => {
                if issues.is_empty() {
                    return Err(precondition(
                        "re-extraction needs at least one issue describing the source data".into(),
                    ));
                }
            }
            Trigger::TaxpayerConfirmed {
                acknowledged,
                return_id,
            } => {
                let missing: Vec<&str> = self
                    .review_required
                    .difference(acknowledged)
                    .map(FieldKey::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(precondition(format!(
                        "fields not acknowledged: {}",
                        missing.join(", ")
                    )));
                }
                if return_id.is_some() {
                    next.return_id.clone_from(return_id);
                }
            }
            Trigger::FieldEdited { field, value } => {
                if self.fields.get(field) == Some(value) {
                    return Err(precondition(format!(
                        "field {field} already holds this value; nothing to re-validate"
                    )));
                }
                value.validate()?;
                next.fields.insert(field.clone(), value.clone());
                next.review_required.insert(field.clone());
            }
            Trigger::Abandon { reason } => {
                next.abandon_reason = Some(*reason);
            }
        }

        next.state = to;
        next.step = self.step.saturating_add(1);
        next.updated_at = now;

        let record = TransitionRecord {
            session_id: next.id.clone(),
            step: next.step,
            from,
            to,
            trigger: trigger.kind(),
            idempotency_key: IdempotencyKey::derive(&next.id, to, next.step),
            request_digest: RequestDigest::of(self.step, trigger)?,
            at: now,
            fields: next.fields.clone(),
        };
        Ok((next, record))
    }
}

// =============================================================================
// IDEMPOTENCY KEY
// =============================================================================

/// Digest of (session id, resulting state, resulting step).
///
/// Two requests that would commit the same state at the same step share a
/// key, so the second is recognised as a retry of the first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    #[must_use]
    pub fn derive(session: &SessionId, state: FilingState, step: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(session.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(state.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&step.to_be_bytes());
        let digest = hasher.finalize();
        let bytes = &digest.as_bytes()[..IDEMPOTENCY_KEY_BYTES];
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Key for a request quoting `expected_step` against `session`.
    #[must_use]
    pub fn for_request(session: &SessionId, trigger: TriggerKind, expected_step: u64) -> Self {
        Self::derive(session, trigger.target(), expected_step.saturating_add(1))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of a whole request: the quoted step and the full trigger payload.
///
/// An idempotency key only names the slot a request would commit into. A key
/// hit is a replay only when this digest matches too; otherwise another
/// request won the slot and the caller is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestDigest(String);

impl RequestDigest {
    pub fn of(expected_step: u64, trigger: &Trigger) -> FilingResult<Self> {
        let body = postcard::to_allocvec(&(expected_step, trigger))
            .map_err(|e| FilingError::Serialization(e.to_string()))?;
        Ok(Self(URL_SAFE_NO_PAD.encode(blake3::hash(&body).as_bytes())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// REQUESTS AND RECORDS
// =============================================================================

/// A caller's request to move a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub session_id: SessionId,
    /// The step the caller last observed.
    pub expected_step: u64,
    pub trigger: Trigger,
}

impl TransitionRequest {
    #[must_use]
    pub fn new(session_id: SessionId, expected_step: u64, trigger: Trigger) -> Self {
        Self {
            session_id,
            expected_step,
            trigger,
        }
    }

    #[must_use]
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_request(&self.session_id, self.trigger.kind(), self.expected_step)
    }

    pub fn digest(&self) -> FilingResult<RequestDigest> {
        RequestDigest::of(self.expected_step, &self.trigger)
    }
}

/// Audit entry for one committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub session_id: SessionId,
    /// Step counter after this transition.
    pub step: u64,
    pub from: FilingState,
    pub to: FilingState,
    pub trigger: TriggerKind,
    pub idempotency_key: IdempotencyKey,
    pub request_digest: RequestDigest,
    pub at: Timestamp,
    /// Field snapshot after this transition.
    pub fields: FieldSet,
}

/// Result of a transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub session: Session,
    pub record: TransitionRecord,
    /// True when the request matched an already committed transition and
    /// nothing was written.
    pub replayed: bool,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{self, FieldValue};
    use crate::money::Cents;
    use crate::workflow::{ParseIssue, ValidationIssue};

    fn session() -> Session {
        Session::new(
            SessionId::sequential(1),
            Ownership::Anonymous,
            WorkflowType::Unified,
            Timestamp(1_000),
        )
    }

    fn submit() -> Trigger {
        Trigger::DocumentsSubmitted {
            documents: vec![DocumentRef::new("w2.pdf", "abc")],
        }
    }

    #[test]
    fn apply_advances_state_and_step() {
        let s = session();
        let (next, record) = s.apply(&submit(), Timestamp(2_000), 3).expect("transition");
        assert_eq!(next.state, FilingState::Extract);
        assert_eq!(next.step, 1);
        assert_eq!(next.updated_at, Timestamp(2_000));
        assert_eq!(record.from, FilingState::Upload);
        assert_eq!(record.to, FilingState::Extract);
        assert_eq!(record.step, 1);
        // Input untouched
        assert_eq!(s.step, 0);
        assert_eq!(s.state, FilingState::Upload);
    }

    #[test]
    fn empty_submission_fails_precondition() {
        let err = session()
            .apply(
                &Trigger::DocumentsSubmitted { documents: vec![] },
                Timestamp(2),
                3,
            )
            .expect_err("must fail");
        assert!(matches!(err, FilingError::PreconditionFailed { .. }));
    }

    #[test]
    fn fatal_parse_issue_blocks_extraction() {
        let (s, _) = session().apply(&submit(), Timestamp(2), 3).expect("submit");
        let trigger = Trigger::ExtractionCompleted {
            fields: FieldSet::new().with(fields::WAGE_INCOME, FieldValue::Amount(Cents::new(1))),
            issues: vec![ParseIssue {
                field: None,
                message: "unreadable page".into(),
                fatal: true,
            }],
        };
        let err = s.apply(&trigger, Timestamp(3), 3).expect_err("must fail");
        assert!(matches!(err, FilingError::PreconditionFailed { .. }));
    }

    #[test]
    fn blocking_validation_issue_keeps_session_in_validate() {
        let mut s = session();
        s.state = FilingState::Validate;
        let trigger = Trigger::ValidationPassed {
            computed: FieldSet::new(),
            issues: vec![ValidationIssue {
                field: Some(FieldKey::from_static(fields::WAGE_INCOME)),
                message: "negative wages".into(),
                blocking: true,
            }],
        };
        assert!(s.apply(&trigger, Timestamp(3), 3).is_err());
    }

    #[test]
    fn confirmation_requires_every_computed_field() {
        let mut s = session();
        s.state = FilingState::Review;
        s.review_required = [fields::TOTAL_TAX, fields::TOTAL_INCOME]
            .into_iter()
            .map(FieldKey::from_static)
            .collect();

        let partial = Trigger::TaxpayerConfirmed {
            acknowledged: [FieldKey::from_static(fields::TOTAL_TAX)].into_iter().collect(),
            return_id: None,
        };
        assert!(s.apply(&partial, Timestamp(5), 3).is_err());

        let full = Trigger::TaxpayerConfirmed {
            acknowledged: s.review_required.clone(),
            return_id: Some(ReturnId::new("ret-9").expect("valid")),
        };
        let (done, _) = s.apply(&full, Timestamp(5), 3).expect("confirm");
        assert_eq!(done.state, FilingState::Complete);
        assert_eq!(done.return_id.as_ref().map(ReturnId::as_str), Some("ret-9"));
    }

    #[test]
    fn identical_edit_needs_no_revalidation() {
        let mut s = session();
        s.state = FilingState::Review;
        s.fields
            .insert(FieldKey::from_static(fields::WAGE_INCOME), FieldValue::Amount(Cents::new(10)));
        let same = Trigger::FieldEdited {
            field: FieldKey::from_static(fields::WAGE_INCOME),
            value: FieldValue::Amount(Cents::new(10)),
        };
        assert!(s.apply(&same, Timestamp(5), 3).is_err());

        let changed = Trigger::FieldEdited {
            field: FieldKey::from_static(fields::WAGE_INCOME),
            value: FieldValue::Amount(Cents::new(20)),
        };
        let (next, _) = s.apply(&changed, Timestamp(5), 3).expect("edit");
        assert_eq!(next.state, FilingState::Validate);
        assert!(next
            .review_required
            .contains(&FieldKey::from_static(fields::WAGE_INCOME)));
    }

    #[test]
    fn retry_budget_is_enforced() {
        let mut s = session();
        s.state = FilingState::Extract;
        s.extraction_failures = 2;
        let failed = Trigger::ExtractionFailed {
            reason: "blurry scan".into(),
        };
        let err = s.apply(&failed, Timestamp(5), 2).expect_err("over budget");
        assert_eq!(
            err,
            FilingError::RetryBudgetExhausted {
                attempts: 2,
                budget: 2
            }
        );
    }

    #[test]
    fn request_key_matches_committed_key() {
        let s = session();
        let request = TransitionRequest::new(s.id.clone(), 0, submit());
        let (_, record) = s.apply(&request.trigger, Timestamp(2), 3).expect("submit");
        assert_eq!(request.idempotency_key(), record.idempotency_key);
    }

    #[test]
    fn same_kind_requests_share_a_key_but_not_a_digest() {
        let mut s = session();
        s.state = FilingState::Review;
        s.step = 3;
        let edit = |amount: i64| {
            TransitionRequest::new(
                s.id.clone(),
                3,
                Trigger::FieldEdited {
                    field: FieldKey::from_static(fields::CREDIT_TOTAL),
                    value: FieldValue::Amount(Cents::new(amount)),
                },
            )
        };
        let a = edit(75_000);
        let b = edit(99_900);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_ne!(a.digest().expect("a"), b.digest().expect("b"));

        let (_, record) = s.apply(&a.trigger, Timestamp(5), 3).expect("edit");
        assert_eq!(record.request_digest, a.digest().expect("a"));
    }

    #[test]
    fn successful_extraction_resets_retry_budget() {
        let mut s = session();
        s.state = FilingState::Extract;
        s.extraction_failures = 2;
        let trigger = Trigger::ExtractionCompleted {
            fields: FieldSet::new().with(fields::WAGE_INCOME, FieldValue::Amount(Cents::new(1))),
            issues: vec![],
        };
        let (next, _) = s.apply(&trigger, Timestamp(5), 2).expect("extract");
        assert_eq!(next.extraction_failures, 0);
    }

    #[test]
    fn keys_differ_by_state_and_step() {
        let id = SessionId::sequential(1);
        let a = IdempotencyKey::derive(&id, FilingState::Extract, 1);
        let b = IdempotencyKey::derive(&id, FilingState::Extract, 2);
        let c = IdempotencyKey::derive(&id, FilingState::Abandoned, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 22);
    }
}
