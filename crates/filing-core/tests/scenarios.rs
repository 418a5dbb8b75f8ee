//! End-to-end filing session scenarios against a real redb store.
//!
//! Uses tempfile for the database and a manual clock for time.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use filing_core::fields::{
    CREDIT_TOTAL, DEDUCTION_TOTAL, FILING_STATUS, RENTAL_INCOME, TAXABLE_INCOME, TOTAL_INCOME,
    TOTAL_TAX, WAGE_INCOME, WITHHOLDING_TOTAL,
};
use filing_core::{
    AbandonReason, Cents, DocumentRef, FieldKey, FieldSet, FieldValue, FilingError, FilingEvent,
    FilingSessionManager, FilingState, ManagerConfig, ManualClock, NewSession, RecordingSink,
    RedbSessionStore, SectionId, Session, Tier, Timestamp, TransferReason, TransitionRequest,
    Trigger, UserId, ValidationIssue, WorkflowType,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    events: Arc<RecordingSink>,
    manager: Arc<FilingSessionManager>,
}

fn harness() -> Harness {
    harness_with(ManagerConfig::default())
}

fn harness_with(config: ManagerConfig) -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = RedbSessionStore::open(dir.path().join("sessions.redb")).unwrap();
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000)));
    let events = Arc::new(RecordingSink::new());
    let manager = FilingSessionManager::new(Arc::new(store), clock.clone(), events.clone(), config);
    Harness {
        _dir: dir,
        clock,
        events,
        manager: Arc::new(manager),
    }
}

fn amount(cents: i64) -> FieldValue {
    FieldValue::Amount(Cents::new(cents))
}

fn extracted_profile() -> FieldSet {
    FieldSet::new()
        .with(FILING_STATUS, FieldValue::Text("single".into()))
        .with(WAGE_INCOME, amount(8_250_000))
        .with(RENTAL_INCOME, amount(1_200_000))
        .with(DEDUCTION_TOTAL, amount(1_460_000))
        .with(CREDIT_TOTAL, amount(50_000))
        .with(WITHHOLDING_TOTAL, amount(1_100_000))
}

fn computed_results() -> FieldSet {
    FieldSet::new()
        .with(TOTAL_INCOME, amount(9_450_000))
        .with(TAXABLE_INCOME, amount(7_990_000))
        .with(TOTAL_TAX, amount(1_035_600))
}

fn step(h: &Harness, session: &Session, trigger: Trigger) -> Session {
    let request = TransitionRequest::new(session.id.clone(), session.step, trigger);
    let outcome = h.manager.transition(&request).unwrap();
    assert!(!outcome.replayed);
    outcome.session
}

fn submit() -> Trigger {
    Trigger::DocumentsSubmitted {
        documents: vec![DocumentRef::new("w2-2024.pdf", "b3:9f2c")],
    }
}

fn extracted(fields: FieldSet) -> Trigger {
    Trigger::ExtractionCompleted {
        fields,
        issues: vec![],
    }
}

fn validated(computed: FieldSet) -> Trigger {
    Trigger::ValidationPassed {
        computed,
        issues: vec![],
    }
}

fn confirm_all(session: &Session) -> Trigger {
    Trigger::TaxpayerConfirmed {
        acknowledged: session.review_required.clone(),
        return_id: None,
    }
}

/// Drive a fresh session to REVIEW with the given extracted profile.
fn session_in_review(h: &Harness, profile: FieldSet) -> Session {
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    let s = step(h, &s, submit());
    let s = step(h, &s, extracted(profile));
    step(h, &s, validated(computed_results()))
}

// =============================================================================
// SCENARIO A: HAPPY PATH
// =============================================================================

#[test]
fn test_happy_path_reaches_complete() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    assert_eq!(s.state, FilingState::Upload);
    assert_eq!(s.step, 0);

    let s = step(&h, &s, submit());
    assert_eq!(s.state, FilingState::Extract);
    let s = step(&h, &s, extracted(extracted_profile()));
    assert_eq!(s.state, FilingState::Validate);
    let s = step(&h, &s, validated(computed_results()));
    assert_eq!(s.state, FilingState::Review);
    let s = step(&h, &s, confirm_all(&s));
    assert_eq!(s.state, FilingState::Complete);
    assert!(s.is_archived());

    let history = h.manager.history(&s.id).unwrap();
    assert_eq!(history.len(), 4);
    for (i, record) in history.iter().enumerate() {
        assert_eq!(record.step, i as u64 + 1);
    }
    let path: Vec<(FilingState, FilingState)> = history.iter().map(|r| (r.from, r.to)).collect();
    assert_eq!(
        path,
        vec![
            (FilingState::Upload, FilingState::Extract),
            (FilingState::Extract, FilingState::Validate),
            (FilingState::Validate, FilingState::Review),
            (FilingState::Review, FilingState::Complete),
        ]
    );
}

#[test]
fn test_complete_session_is_read_only() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());
    let s = step(&h, &s, confirm_all(&s));

    let edit = TransitionRequest::new(
        s.id.clone(),
        s.step,
        Trigger::FieldEdited {
            field: FieldKey::new("wage_income").unwrap(),
            value: amount(1),
        },
    );
    assert!(matches!(
        h.manager.transition(&edit),
        Err(FilingError::InvalidTransition { .. })
    ));
    let abandon = h.manager.abandon(&s.id, s.step, AbandonReason::Cancelled);
    assert!(matches!(
        abandon,
        Err(FilingError::InvalidTransition { .. })
    ));

    // Views still render from the archived snapshot.
    assert!(h.manager.render_view(&s.id, Tier::Complete).is_ok());
}

#[test]
fn test_review_edit_loops_back_through_validation() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());

    let s = step(
        &h,
        &s,
        Trigger::FieldEdited {
            field: FieldKey::new("deduction_total").unwrap(),
            value: amount(1_500_000),
        },
    );
    assert_eq!(s.state, FilingState::Validate);
    assert_eq!(
        s.fields.amount(DEDUCTION_TOTAL),
        Some(Cents::new(1_500_000))
    );

    let s = step(&h, &s, validated(computed_results()));
    let unconfirmed = TransitionRequest::new(
        s.id.clone(),
        s.step,
        Trigger::TaxpayerConfirmed {
            acknowledged: BTreeSet::new(),
            return_id: None,
        },
    );
    assert!(matches!(
        h.manager.transition(&unconfirmed),
        Err(FilingError::PreconditionFailed { .. })
    ));
    let s = step(&h, &s, confirm_all(&s));
    assert_eq!(s.state, FilingState::Complete);
}

// =============================================================================
// SCENARIO B: RECOVERABLE EXTRACTION FAILURES
// =============================================================================

#[test]
fn test_recoverable_failures_then_success() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    let s = step(&h, &s, submit());

    let fail = || Trigger::ExtractionFailed {
        reason: "scan unreadable".into(),
    };
    let s = step(&h, &s, fail());
    let s = step(&h, &s, submit());
    let s = step(&h, &s, fail());
    let s = step(&h, &s, submit());
    assert_eq!(s.extraction_failures, 2);
    let s = step(&h, &s, extracted(extracted_profile()));
    assert_eq!(s.state, FilingState::Validate);
    assert_eq!(s.extraction_failures, 0);

    let states: Vec<FilingState> = std::iter::once(FilingState::Extract)
        .chain(h.manager.history(&s.id).unwrap().iter().skip(1).map(|r| r.to))
        .collect();
    assert_eq!(
        states,
        vec![
            FilingState::Extract,
            FilingState::Upload,
            FilingState::Extract,
            FilingState::Upload,
            FilingState::Extract,
            FilingState::Validate,
        ]
    );
}

#[test]
fn test_retry_budget_is_enforced() {
    let h = harness_with(ManagerConfig {
        retry_budget: 2,
        ..ManagerConfig::default()
    });
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    let fail = || Trigger::ExtractionFailed {
        reason: "timeout".into(),
    };

    let mut s = step(&h, &s, submit());
    for _ in 0..2 {
        s = step(&h, &s, fail());
        s = step(&h, &s, submit());
    }

    let request = TransitionRequest::new(s.id.clone(), s.step, fail());
    let err = h.manager.transition(&request).unwrap_err();
    assert_eq!(
        err,
        FilingError::RetryBudgetExhausted {
            attempts: 2,
            budget: 2
        }
    );
    assert!(!err.is_retryable());

    // The failed attempt wrote nothing.
    let stored = h.manager.session(&s.id).unwrap();
    assert_eq!(stored.state, FilingState::Extract);
    assert_eq!(stored.step, s.step);

    // Abandon is still available as the way out.
    let out = h
        .manager
        .abandon(&s.id, s.step, AbandonReason::Cancelled)
        .unwrap();
    assert_eq!(out.session.state, FilingState::Abandoned);
}

#[test]
fn test_reextraction_gets_a_fresh_retry_budget() {
    let h = harness_with(ManagerConfig {
        retry_budget: 1,
        ..ManagerConfig::default()
    });
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    let fail = || Trigger::ExtractionFailed {
        reason: "timeout".into(),
    };

    let s = step(&h, &s, submit());
    let s = step(&h, &s, fail());
    let s = step(&h, &s, submit());
    let s = step(&h, &s, extracted(extracted_profile()));
    let s = step(
        &h,
        &s,
        Trigger::ValidationFailed {
            issues: vec![ValidationIssue {
                field: Some(FieldKey::new(WAGE_INCOME).unwrap()),
                message: "wages do not match W-2 box 1".into(),
                blocking: true,
            }],
        },
    );
    assert_eq!(s.state, FilingState::Extract);

    let s = step(&h, &s, fail());
    assert_eq!(s.state, FilingState::Upload);
    assert_eq!(s.extraction_failures, 1);
}

// =============================================================================
// SCENARIO C: VIEW WITH NO COMPUTED RESULT
// =============================================================================

#[test]
fn test_teaser_without_computed_fields_is_insufficient() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    let s = step(&h, &s, submit());
    let s = step(&h, &s, extracted(extracted_profile()));

    let err = h.manager.render_view(&s.id, Tier::Teaser).unwrap_err();
    match err {
        FilingError::InsufficientData { missing } => {
            let names: Vec<&str> = missing.iter().map(FieldKey::as_str).collect();
            assert_eq!(names, vec!["total_income", "taxable_income", "total_tax"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// SCENARIO D: MISSING OPTIONAL SECTION DATA
// =============================================================================

#[test]
fn test_full_view_omits_rental_section_without_rental_income() {
    let h = harness();
    let profile: FieldSet = extracted_profile()
        .iter()
        .filter(|(k, _)| k.as_str() != RENTAL_INCOME)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let s = session_in_review(&h, profile);

    let view = h.manager.render_view(&s.id, Tier::Full).unwrap();
    assert_eq!(
        view.section_ids(),
        vec![
            SectionId::Summary,
            SectionId::FilingStatus,
            SectionId::Income,
            SectionId::Deductions,
            SectionId::TaxComputation,
        ]
    );
    assert!(view.section(SectionId::RentalIncome).is_none());
    assert!(!view.locked.contains(&SectionId::RentalIncome));
}

#[test]
fn test_disclosure_grows_with_tier() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());

    let teaser = h.manager.render_view(&s.id, Tier::Teaser).unwrap();
    let full = h.manager.render_view(&s.id, Tier::Full).unwrap();
    let complete = h.manager.render_view(&s.id, Tier::Complete).unwrap();

    assert_eq!(
        teaser.section_ids(),
        vec![SectionId::Summary, SectionId::FilingStatus]
    );
    for id in teaser.section_ids() {
        assert!(full.section_ids().contains(&id));
    }
    for id in full.section_ids() {
        assert!(complete.section_ids().contains(&id));
    }
    assert!(complete.section(SectionId::FieldLedger).is_some());
    assert!(complete.locked.is_empty());
    assert!(teaser.locked.contains(&SectionId::Credits));

    // Rendering reads only: the session is untouched.
    let after = h.manager.session(&s.id).unwrap();
    assert_eq!(after, s);
}

#[test]
fn test_render_is_byte_identical_across_calls() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());
    for tier in Tier::ALL {
        let a = h.manager.render_view(&s.id, tier).unwrap();
        let b = h.manager.render_view(&s.id, tier).unwrap();
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }
}

// =============================================================================
// SCENARIO E: CONCURRENT WRITERS
// =============================================================================

#[test]
fn test_concurrent_writers_one_wins() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());

    let barrier = Arc::new(Barrier::new(2));
    let confirm = TransitionRequest::new(s.id.clone(), s.step, confirm_all(&s));
    let edit = TransitionRequest::new(
        s.id.clone(),
        s.step,
        Trigger::FieldEdited {
            field: FieldKey::new("credit_total").unwrap(),
            value: amount(75_000),
        },
    );

    let handles: Vec<_> = [confirm, edit]
        .into_iter()
        .map(|request| {
            let manager = Arc::clone(&h.manager);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                manager.transition(&request)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(FilingError::StaleTransition { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(stale, 1);

    let stored = h.manager.session(&s.id).unwrap();
    assert_eq!(stored.step, s.step + 1);
    assert_eq!(h.manager.history(&s.id).unwrap().len() as u64, stored.step);
}

#[test]
fn test_concurrent_edits_of_the_same_field_one_wins() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());

    let barrier = Arc::new(Barrier::new(2));
    let edit = |cents| {
        TransitionRequest::new(
            s.id.clone(),
            s.step,
            Trigger::FieldEdited {
                field: FieldKey::new(CREDIT_TOTAL).unwrap(),
                value: amount(cents),
            },
        )
    };

    let handles: Vec<_> = [edit(75_000), edit(99_900)]
        .into_iter()
        .map(|request| {
            let manager = Arc::clone(&h.manager);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                manager.transition(&request).map(|o| (request, o))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(!winners[0].1.replayed);
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(FilingError::StaleTransition { .. })))
        .count();
    assert_eq!(stale, 1);

    // The stored value is the winner's, never a silently dropped loser's.
    let Trigger::FieldEdited { value, .. } = &winners[0].0.trigger else {
        panic!("unexpected trigger");
    };
    let stored = h.manager.session(&s.id).unwrap();
    assert_eq!(stored.fields.get_static(CREDIT_TOTAL), Some(value));
    assert_eq!(stored.step, s.step + 1);
}

#[test]
fn test_different_upload_after_commit_is_stale_not_replayed() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    step(&h, &s, submit());

    let other = TransitionRequest::new(
        s.id.clone(),
        0,
        Trigger::DocumentsSubmitted {
            documents: vec![DocumentRef::new("1099-int.pdf", "b3:11aa")],
        },
    );
    assert_eq!(
        h.manager.transition(&other).unwrap_err(),
        FilingError::StaleTransition {
            expected: 0,
            actual: 1
        }
    );
    let stored = h.manager.session(&s.id).unwrap();
    assert_eq!(stored.documents.len(), 1);
}

#[test]
fn test_stale_request_carries_current_step() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    step(&h, &s, submit());

    let late = h.manager.abandon(&s.id, 0, AbandonReason::Cancelled);
    assert_eq!(
        late.unwrap_err(),
        FilingError::StaleTransition {
            expected: 0,
            actual: 1
        }
    );
}

// =============================================================================
// IDEMPOTENCY
// =============================================================================

#[test]
fn test_retried_request_replays_committed_result() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    let request = TransitionRequest::new(s.id.clone(), 0, submit());

    let first = h.manager.transition(&request).unwrap();
    h.clock.advance(5_000);
    let second = h.manager.transition(&request).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.record, second.record);
    assert_eq!(second.record.idempotency_key, request.idempotency_key());
    assert_eq!(h.manager.history(&s.id).unwrap().len(), 1);

    let transitioned = h
        .events
        .events()
        .iter()
        .filter(|e| matches!(e, FilingEvent::Transitioned { .. }))
        .count();
    assert_eq!(transitioned, 1);
}

// =============================================================================
// EXPRESS WORKFLOW
// =============================================================================

#[test]
fn test_express_workflow_has_no_review_loop() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Express))
        .unwrap();
    let s = step(&h, &s, submit());
    let s = step(&h, &s, extracted(extracted_profile()));
    let s = step(&h, &s, validated(computed_results()));

    let edit = TransitionRequest::new(
        s.id.clone(),
        s.step,
        Trigger::FieldEdited {
            field: FieldKey::new("wage_income").unwrap(),
            value: amount(1),
        },
    );
    assert!(matches!(
        h.manager.transition(&edit),
        Err(FilingError::InvalidTransition { .. })
    ));
    let s = step(&h, &s, confirm_all(&s));
    assert_eq!(s.state, FilingState::Complete);
}

// =============================================================================
// TRANSFER
// =============================================================================

#[test]
fn test_anonymous_session_claimed_keeps_progress() {
    let h = harness();
    let s = session_in_review(&h, extracted_profile());

    let (moved, record) = h
        .manager
        .transfer(&s.id, "user-42", TransferReason::AnonymousClaim)
        .unwrap();
    assert_eq!(moved.user_id(), Some(&UserId::new("user-42").unwrap()));
    assert_eq!(moved.state, s.state);
    assert_eq!(moved.step, s.step);
    assert_eq!(record.state, FilingState::Review);

    // A second claim by someone else is refused.
    let err = h
        .manager
        .transfer(&s.id, "user-43", TransferReason::AnonymousClaim)
        .unwrap_err();
    assert!(matches!(err, FilingError::AlreadyOwned { .. }));

    // Support may still move it.
    h.manager
        .transfer(&s.id, "user-43", TransferReason::SupportReassignment)
        .unwrap();
    let transfers = h.manager.transfers(&s.id).unwrap();
    assert_eq!(transfers.len(), 2);
    assert!(transfers[0].transfer_id < transfers[1].transfer_id);

    // The transition path still works with the old step counter.
    let s = h.manager.session(&s.id).unwrap();
    let s = step(&h, &s, confirm_all(&s));
    assert_eq!(s.state, FilingState::Complete);
}

#[test]
fn test_abandoned_session_cannot_be_transferred() {
    let h = harness();
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    h.manager
        .abandon(&s.id, 0, AbandonReason::Cancelled)
        .unwrap();
    let err = h
        .manager
        .transfer(&s.id, "user-1", TransferReason::AnonymousClaim)
        .unwrap_err();
    assert_eq!(err, FilingError::SessionAbandoned(s.id.clone()));
    assert!(h.manager.transfers(&s.id).unwrap().is_empty());
}

// =============================================================================
// INACTIVITY SWEEP
// =============================================================================

#[test]
fn test_sweep_abandons_idle_sessions_through_transition_path() {
    let h = harness_with(ManagerConfig {
        inactivity_timeout_ms: 60_000,
        ..ManagerConfig::default()
    });
    let s = h
        .manager
        .create_session(NewSession::anonymous(WorkflowType::Unified))
        .unwrap();
    h.clock.advance(60_001);

    let swept = h.manager.sweep_inactive().unwrap();
    assert_eq!(swept, vec![s.id.clone()]);

    let history = h.manager.history(&s.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to, FilingState::Abandoned);
    assert_eq!(
        h.manager.session(&s.id).unwrap().abandon_reason,
        Some(AbandonReason::InactivityTimeout)
    );
}
