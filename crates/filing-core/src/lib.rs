//! # Filing Core
//!
//! The deterministic engine behind a taxpayer filing session.
//!
//! A filing session moves through a fixed state machine
//! (`UPLOAD → EXTRACT → VALIDATE → REVIEW → COMPLETE`, plus the absorbing
//! `ABANDONED`). Every committed transition is written to a durable redb
//! store before it is returned, keyed by an idempotency key so that retries
//! are harmless, and guarded by a per-session step counter so that two
//! concurrent writers can never both win.
//!
//! Report views are pure projections of a stored session at a disclosure
//! tier. They are never persisted.
//!
//! ## Constraints
//!
//! - `BTreeMap`/`BTreeSet` only, for deterministic ordering
//! - No floating point; currency is [`Cents`]
//! - No wall clock; time comes from a [`Clock`]
//! - No async; the app layer owns the runtime

pub mod clock;
pub mod error;
pub mod events;
pub mod fields;
pub mod formats;
pub mod manager;
pub mod money;
pub mod primitives;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod types;
pub mod view;
pub mod workflow;

pub use clock::{Clock, ManualClock};
pub use error::{FilingError, FilingResult};
pub use events::{EventSink, FilingEvent, NoopSink, RecordingSink};
pub use fields::{FieldSet, FieldValue};
pub use manager::{FilingSessionManager, ManagerConfig, NewSession};
pub use money::Cents;
pub use session::{
    IdempotencyKey, RequestDigest, Session, TransitionOutcome, TransitionRecord, TransitionRequest,
};
pub use storage::{RedbSessionStore, SessionStore};
pub use transfer::{SessionTransfer, TransferReason};
pub use types::{DocumentRef, FieldKey, Ownership, ReturnId, SessionId, Timestamp, UserId};
pub use view::{ReportView, SectionId, Tier};
pub use workflow::{
    AbandonReason, FilingState, ParseIssue, Trigger, TriggerKind, ValidationIssue, WorkflowType,
};
