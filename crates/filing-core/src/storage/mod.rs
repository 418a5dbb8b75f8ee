//! # Storage Module
//!
//! Durable, keyed storage for filing sessions using redb.
//!
//! Uses redb embedded database for:
//! - ACID transactions (a transition or transfer commits whole or not at all)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! The single-writer property is what serializes transitions: the step
//! check and the write happen inside one write transaction.

mod redb_store;

pub use redb_store::RedbSessionStore;

use crate::error::FilingResult;
use crate::session::{Session, TransitionOutcome, TransitionRecord, TransitionRequest};
use crate::transfer::SessionTransfer;
use crate::types::{SessionId, Timestamp};

/// Apply step of a transition, run inside the store's write transaction.
pub type ApplyFn<'a> = dyn FnMut(&Session) -> FilingResult<(Session, TransitionRecord)> + 'a;

/// Plan step of a transfer: receives the stored session and the transfer id
/// reserved for it.
pub type TransferFn<'a> =
    dyn FnMut(&Session, u64) -> FilingResult<(Session, SessionTransfer)> + 'a;

/// The durable session store. The only writer of session state.
pub trait SessionStore: Send + Sync {
    /// Reserve the next value of the session id sequence.
    fn next_session_seq(&self) -> FilingResult<u64>;

    /// Insert a new session. Fails with `SessionExists` if the id is taken.
    fn insert_session(&self, session: &Session) -> FilingResult<()>;

    fn load_session(&self, id: &SessionId) -> FilingResult<Option<Session>>;

    /// All sessions, ordered by id.
    fn list_sessions(&self) -> FilingResult<Vec<Session>>;

    /// Non-terminal sessions last touched before `cutoff`, oldest first.
    fn idle_sessions(&self, cutoff: Timestamp) -> FilingResult<Vec<Session>>;

    /// Atomically: replay if the same request already committed under its
    /// idempotency key, stale if a different one did; else check the step counter, run `apply`, and commit the
    /// new snapshot, audit record and key together.
    fn commit_transition(
        &self,
        request: &TransitionRequest,
        apply: &mut ApplyFn<'_>,
    ) -> FilingResult<TransitionOutcome>;

    /// Atomically update ownership and append the transfer record.
    fn commit_transfer(
        &self,
        id: &SessionId,
        plan: &mut TransferFn<'_>,
    ) -> FilingResult<(Session, SessionTransfer)>;

    /// Committed transitions of a session, by step.
    fn transitions(&self, id: &SessionId) -> FilingResult<Vec<TransitionRecord>>;

    /// Transfers of a session, by transfer id.
    fn transfers(&self, id: &SessionId) -> FilingResult<Vec<SessionTransfer>>;
}
