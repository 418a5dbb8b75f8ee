//! # Events
//!
//! Notifications emitted after a commit for downstream collaborators
//! (email, CRM). Emission is fire-and-forget: a sink must not block and
//! cannot fail the operation that produced the event.

use crate::session::TransitionRecord;
use crate::transfer::SessionTransfer;
use crate::types::{Ownership, SessionId, Timestamp};
use crate::workflow::WorkflowType;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FilingEvent {
    SessionCreated {
        session_id: SessionId,
        owner: Ownership,
        workflow: WorkflowType,
        at: Timestamp,
    },
    Transitioned {
        record: TransitionRecord,
    },
    Transferred {
        transfer: SessionTransfer,
    },
}

impl FilingEvent {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionCreated { session_id, .. } => session_id,
            Self::Transitioned { record } => &record.session_id,
            Self::Transferred { transfer } => &transfer.session_id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::Transitioned { .. } => "transitioned",
            Self::Transferred { .. } => "transferred",
        }
    }
}

/// Receiver of [`FilingEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FilingEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: FilingEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FilingEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<FilingEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: FilingEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn emit(&self, event: FilingEvent) {
        (**self).emit(event);
    }
}
