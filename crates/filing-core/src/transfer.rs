//! # Session Transfer
//!
//! Re-association of a session with a new owner, e.g. an anonymous session
//! claimed after sign-up. A transfer never moves the state machine; it only
//! rewrites ownership and appends an immutable record.

use crate::error::{FilingError, FilingResult};
use crate::session::Session;
use crate::types::{Ownership, SessionId, Timestamp, UserId};
use crate::workflow::FilingState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why ownership changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    /// An anonymous session claimed by a freshly authenticated user.
    AnonymousClaim,
    /// Two accounts merged; the surviving account takes the session.
    AccountMerge,
    /// Support staff moved the session to the correct account.
    SupportReassignment,
}

impl TransferReason {
    /// Whether this reason may take a session away from another user.
    #[must_use]
    pub fn permits_reclaim(self) -> bool {
        !matches!(self, Self::AnonymousClaim)
    }
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AnonymousClaim => "anonymous_claim",
            Self::AccountMerge => "account_merge",
            Self::SupportReassignment => "support_reassignment",
        })
    }
}

/// Append-only audit record of one ownership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTransfer {
    pub transfer_id: u64,
    pub session_id: SessionId,
    pub from: Ownership,
    pub to: UserId,
    pub reason: TransferReason,
    /// State of the session when it changed hands (unchanged by the transfer).
    pub state: FilingState,
    pub at: Timestamp,
}

/// Validate a transfer of `session` to `target` and produce the updated
/// session plus its record. Pure; the store commits both atomically.
pub fn plan_transfer(
    session: &Session,
    target: &UserId,
    reason: TransferReason,
    transfer_id: u64,
    now: Timestamp,
) -> FilingResult<(Session, SessionTransfer)> {
    if session.state == FilingState::Abandoned {
        return Err(FilingError::SessionAbandoned(session.id.clone()));
    }
    match &session.owner {
        Ownership::User(current) if current == target => {
            return Err(FilingError::TargetInvalid(format!(
                "session {} is already owned by {target}",
                session.id
            )));
        }
        Ownership::User(current) if !reason.permits_reclaim() => {
            return Err(FilingError::AlreadyOwned {
                owner: current.clone(),
            });
        }
        _ => {}
    }

    let mut next = session.clone();
    next.owner = Ownership::User(target.clone());
    next.updated_at = now;

    let record = SessionTransfer {
        transfer_id,
        session_id: session.id.clone(),
        from: session.owner.clone(),
        to: target.clone(),
        reason,
        state: session.state,
        at: now,
    };
    Ok((next, record))
}

/// Parse a transfer target, mapping malformed identities to `TargetInvalid`.
pub fn parse_target(raw: &str) -> FilingResult<UserId> {
    UserId::new(raw).map_err(|e| FilingError::TargetInvalid(e.to_string()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowType;

    fn user(id: &str) -> UserId {
        UserId::new(id).expect("valid user id")
    }

    fn anonymous() -> Session {
        Session::new(
            SessionId::sequential(1),
            Ownership::Anonymous,
            WorkflowType::Unified,
            Timestamp(0),
        )
    }

    #[test]
    fn claim_of_anonymous_session() {
        let s = anonymous();
        let (next, record) =
            plan_transfer(&s, &user("alice"), TransferReason::AnonymousClaim, 1, Timestamp(9))
                .expect("claim");
        assert_eq!(next.user_id(), Some(&user("alice")));
        assert_eq!(next.state, s.state);
        assert_eq!(next.step, s.step);
        assert_eq!(record.from, Ownership::Anonymous);
        assert_eq!(record.transfer_id, 1);
    }

    #[test]
    fn claim_of_owned_session_is_rejected() {
        let mut s = anonymous();
        s.owner = Ownership::User(user("bob"));
        let err = plan_transfer(&s, &user("alice"), TransferReason::AnonymousClaim, 1, Timestamp(9))
            .expect_err("owned");
        assert_eq!(err, FilingError::AlreadyOwned { owner: user("bob") });
    }

    #[test]
    fn reassignment_may_reclaim() {
        let mut s = anonymous();
        s.owner = Ownership::User(user("bob"));
        let result = plan_transfer(
            &s,
            &user("alice"),
            TransferReason::SupportReassignment,
            2,
            Timestamp(9),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn same_owner_is_invalid_target() {
        let mut s = anonymous();
        s.owner = Ownership::User(user("bob"));
        let err = plan_transfer(&s, &user("bob"), TransferReason::AccountMerge, 1, Timestamp(9))
            .expect_err("same owner");
        assert!(matches!(err, FilingError::TargetInvalid(_)));
    }

    #[test]
    fn abandoned_session_cannot_move() {
        let mut s = anonymous();
        s.state = FilingState::Abandoned;
        let err = plan_transfer(&s, &user("alice"), TransferReason::AnonymousClaim, 1, Timestamp(9))
            .expect_err("abandoned");
        assert!(matches!(err, FilingError::SessionAbandoned(_)));
    }

    #[test]
    fn malformed_target_maps_to_target_invalid() {
        assert!(matches!(parse_target(""), Err(FilingError::TargetInvalid(_))));
        assert!(parse_target("carol").is_ok());
    }
}
