//! # Filing Session Manager
//!
//! The one entry point for callers. Owns the store, the clock, the event
//! sink and the policy knobs, and is the only code that turns a request
//! into a committed write.
//!
//! Every write path has the same shape: load inside the store's write
//! transaction, run a pure planning function, commit, then emit. Events
//! are emitted only for writes that actually happened, so a replayed
//! transition is silent.

use crate::clock::Clock;
use crate::error::{FilingError, FilingResult};
use crate::events::{EventSink, FilingEvent};
use crate::primitives::{DEFAULT_INACTIVITY_TIMEOUT_MS, DEFAULT_RETRY_BUDGET};
use crate::session::{Session, TransitionOutcome, TransitionRecord, TransitionRequest};
use crate::storage::SessionStore;
use crate::transfer::{SessionTransfer, TransferReason, parse_target, plan_transfer};
use crate::types::{Ownership, SessionId, Timestamp, UserId};
use crate::view::{ReportView, Tier, render_view};
use crate::workflow::{AbandonReason, Trigger, WorkflowType};
use std::sync::Arc;

/// Policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Extraction failures tolerated before `RetryBudgetExhausted`.
    pub retry_budget: u32,
    /// Idle milliseconds before the sweep abandons a session.
    pub inactivity_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
        }
    }
}

/// Parameters of a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSession {
    /// Explicit id. When `None` the store's sequence mints one.
    pub id: Option<SessionId>,
    /// `None` creates an anonymous session.
    pub owner: Option<UserId>,
    pub workflow: WorkflowType,
}

impl NewSession {
    #[must_use]
    pub fn anonymous(workflow: WorkflowType) -> Self {
        Self {
            id: None,
            owner: None,
            workflow,
        }
    }

    #[must_use]
    pub fn owned_by(owner: UserId, workflow: WorkflowType) -> Self {
        Self {
            id: None,
            owner: Some(owner),
            workflow,
        }
    }
}

pub struct FilingSessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    config: ManagerConfig,
}

impl std::fmt::Debug for FilingSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilingSessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FilingSessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Create a session in `UPLOAD` at step 0.
    pub fn create_session(&self, params: NewSession) -> FilingResult<Session> {
        let id = match params.id {
            Some(id) => id,
            None => SessionId::sequential(self.store.next_session_seq()?),
        };
        let now = self.clock.now();
        let session = Session::new(id, Ownership::from(params.owner), params.workflow, now);
        self.store.insert_session(&session)?;

        tracing::info!(
            session = %session.id,
            workflow = %session.workflow,
            anonymous = session.is_anonymous(),
            "session created"
        );
        self.events.emit(FilingEvent::SessionCreated {
            session_id: session.id.clone(),
            owner: session.owner.clone(),
            workflow: session.workflow,
            at: now,
        });
        Ok(session)
    }

    /// Current snapshot of a session.
    pub fn session(&self, id: &SessionId) -> FilingResult<Session> {
        self.store
            .load_session(id)?
            .ok_or_else(|| FilingError::SessionNotFound(id.clone()))
    }

    pub fn list_sessions(&self) -> FilingResult<Vec<Session>> {
        self.store.list_sessions()
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Commit one transition, or replay it if its idempotency key has
    /// already been committed.
    pub fn transition(&self, request: &TransitionRequest) -> FilingResult<TransitionOutcome> {
        let now = self.clock.now();
        let budget = self.config.retry_budget;
        let result = self.store.commit_transition(request, &mut |session| {
            session.apply(&request.trigger, now, budget)
        });

        match result {
            Ok(outcome) => {
                if outcome.replayed {
                    tracing::debug!(
                        session = %request.session_id,
                        step = outcome.record.step,
                        "transition replayed"
                    );
                } else {
                    tracing::info!(
                        session = %outcome.record.session_id,
                        from = %outcome.record.from,
                        to = %outcome.record.to,
                        step = outcome.record.step,
                        "transition committed"
                    );
                    self.events.emit(FilingEvent::Transitioned {
                        record: outcome.record.clone(),
                    });
                }
                Ok(outcome)
            }
            Err(err) => {
                tracing::debug!(
                    session = %request.session_id,
                    trigger = %request.trigger.kind(),
                    code = err.code(),
                    "transition rejected: {err}"
                );
                Err(err)
            }
        }
    }

    /// Abandon a session from any non-terminal state.
    pub fn abandon(
        &self,
        id: &SessionId,
        expected_step: u64,
        reason: AbandonReason,
    ) -> FilingResult<TransitionOutcome> {
        let request = TransitionRequest::new(id.clone(), expected_step, Trigger::Abandon { reason });
        self.transition(&request)
    }

    /// Committed transitions of a session, oldest first.
    pub fn history(&self, id: &SessionId) -> FilingResult<Vec<TransitionRecord>> {
        self.session(id)?;
        self.store.transitions(id)
    }

    // =========================================================================
    // TRANSFERS
    // =========================================================================

    /// Re-associate a session with `target`. The workflow state and step
    /// are left untouched.
    pub fn transfer(
        &self,
        id: &SessionId,
        target: &str,
        reason: TransferReason,
    ) -> FilingResult<(Session, SessionTransfer)> {
        let target = parse_target(target)?;
        let now = self.clock.now();
        let (session, transfer) = self.store.commit_transfer(id, &mut |session, transfer_id| {
            plan_transfer(session, &target, reason, transfer_id, now)
        })?;

        tracing::info!(
            session = %id,
            to = %transfer.to,
            reason = %transfer.reason,
            transfer_id = transfer.transfer_id,
            "session transferred"
        );
        self.events.emit(FilingEvent::Transferred {
            transfer: transfer.clone(),
        });
        Ok((session, transfer))
    }

    pub fn transfers(&self, id: &SessionId) -> FilingResult<Vec<SessionTransfer>> {
        self.session(id)?;
        self.store.transfers(id)
    }

    // =========================================================================
    // VIEWS
    // =========================================================================

    /// Render the stored session at `tier`. Reads only.
    pub fn render_view(&self, id: &SessionId, tier: Tier) -> FilingResult<ReportView> {
        let session = self.session(id)?;
        render_view(&session, tier)
    }

    // =========================================================================
    // SWEEP
    // =========================================================================

    /// Abandon every non-terminal session idle for longer than the
    /// configured timeout. Returns the ids that were abandoned.
    ///
    /// Only the store's index of non-terminal sessions is scanned. Goes
    /// through the normal transition path. A session that moved
    /// between the scan and the commit comes back stale and is skipped.
    pub fn sweep_inactive(&self) -> FilingResult<Vec<SessionId>> {
        let now = self.clock.now();
        let cutoff = Timestamp(now.millis().saturating_sub(self.config.inactivity_timeout_ms));
        let mut abandoned = Vec::new();

        for session in self.store.idle_sessions(cutoff)? {
            match self.abandon(&session.id, session.step, AbandonReason::InactivityTimeout) {
                Ok(outcome) if !outcome.replayed => abandoned.push(session.id),
                Ok(_) => {}
                Err(FilingError::StaleTransition { .. } | FilingError::InvalidTransition { .. }) => {
                    tracing::debug!(session = %session.id, "sweep skipped session that moved");
                }
                Err(err) => return Err(err),
            }
        }

        if !abandoned.is_empty() {
            tracing::info!(count = abandoned.len(), "inactive sessions abandoned");
        }
        Ok(abandoned)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::RecordingSink;
    use crate::storage::RedbSessionStore;
    use crate::types::DocumentRef;
    use crate::workflow::FilingState;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        events: Arc<RecordingSink>,
        manager: FilingSessionManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = RedbSessionStore::open(dir.path().join("m.redb")).expect("open");
        let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
        let events = Arc::new(RecordingSink::new());
        let manager = FilingSessionManager::new(
            Arc::new(store),
            clock.clone(),
            events.clone(),
            ManagerConfig::default(),
        );
        Fixture {
            _dir: dir,
            clock,
            events,
            manager,
        }
    }

    fn submit(session: &Session) -> TransitionRequest {
        TransitionRequest::new(
            session.id.clone(),
            session.step,
            Trigger::DocumentsSubmitted {
                documents: vec![DocumentRef::new("w2.pdf", "abc")],
            },
        )
    }

    #[test]
    fn create_mints_sequential_ids() {
        let f = fixture();
        let a = f.manager.create_session(NewSession::default()).expect("a");
        let b = f.manager.create_session(NewSession::default()).expect("b");
        assert_eq!(a.id.as_str(), "fs-000000000001");
        assert_eq!(b.id.as_str(), "fs-000000000002");
        assert_eq!(a.state, FilingState::Upload);
        assert_eq!(f.events.len(), 2);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let f = fixture();
        let id = SessionId::sequential(99);
        assert_eq!(
            f.manager.session(&id),
            Err(FilingError::SessionNotFound(id.clone()))
        );
        assert!(f.manager.render_view(&id, Tier::Teaser).is_err());
    }

    #[test]
    fn replay_emits_no_second_event() {
        let f = fixture();
        let s = f.manager.create_session(NewSession::default()).expect("create");
        let request = submit(&s);
        f.manager.transition(&request).expect("first");
        let replay = f.manager.transition(&request).expect("replay");
        assert!(replay.replayed);
        // created + one transition
        assert_eq!(f.events.len(), 2);
    }

    #[test]
    fn abandon_is_terminal() {
        let f = fixture();
        let s = f.manager.create_session(NewSession::default()).expect("create");
        let out = f
            .manager
            .abandon(&s.id, 0, AbandonReason::Cancelled)
            .expect("abandon");
        assert_eq!(out.session.state, FilingState::Abandoned);
        let again = f.manager.transition(&submit(&out.session));
        assert!(matches!(again, Err(FilingError::InvalidTransition { .. })));
    }

    #[test]
    fn sweep_abandons_only_idle_sessions() {
        let f = fixture();
        let idle = f.manager.create_session(NewSession::default()).expect("idle");
        f.clock.advance(DEFAULT_INACTIVITY_TIMEOUT_MS);
        let fresh = f.manager.create_session(NewSession::default()).expect("fresh");
        f.clock.advance(1);

        let swept = f.manager.sweep_inactive().expect("sweep");
        assert_eq!(swept, vec![idle.id.clone()]);

        let idle = f.manager.session(&idle.id).expect("idle");
        assert_eq!(idle.state, FilingState::Abandoned);
        assert_eq!(idle.abandon_reason, Some(AbandonReason::InactivityTimeout));
        let fresh = f.manager.session(&fresh.id).expect("fresh");
        assert_eq!(fresh.state, FilingState::Upload);

        // Already abandoned sessions are not swept twice.
        f.clock.advance(DEFAULT_INACTIVITY_TIMEOUT_MS);
        let swept = f.manager.sweep_inactive().expect("sweep");
        assert_eq!(swept, vec![fresh.id]);
    }

    #[test]
    fn transfer_rejects_malformed_target() {
        let f = fixture();
        let s = f.manager.create_session(NewSession::default()).expect("create");
        let err = f
            .manager
            .transfer(&s.id, "not a user!", TransferReason::AnonymousClaim)
            .expect_err("bad target");
        assert!(matches!(err, FilingError::TargetInvalid(_)));
        assert!(f.manager.transfers(&s.id).expect("list").is_empty());
    }
}
