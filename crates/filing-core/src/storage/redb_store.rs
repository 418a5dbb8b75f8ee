//! redb-backed [`SessionStore`].
//!
//! Tables:
//!
//! | table              | key              | value                     |
//! |--------------------|------------------|---------------------------|
//! | `sessions`         | session id       | latest session snapshot   |
//! | `transitions`      | (session, step)  | transition record         |
//! | `idempotency`      | idempotency key  | step it committed         |
//! | `active`           | (updated_at, id) | () for non-terminal ones  |
//! | `transfers`        | transfer id      | transfer record           |
//! | `session_transfers`| session id       | transfer ids (multimap)   |
//! | `meta`             | counter name     | next value                |

use super::{ApplyFn, SessionStore, TransferFn};
use crate::error::{FilingError, FilingResult, storage};
use crate::formats::{RecordKind, decode_record, encode_record};
use crate::session::{Session, TransitionOutcome, TransitionRecord, TransitionRequest};
use crate::transfer::SessionTransfer;
use crate::types::{SessionId, Timestamp};
use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableTable,
    Table, TableDefinition, WriteTransaction,
};
use std::path::Path;

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const TRANSITIONS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("transitions");
const IDEMPOTENCY: TableDefinition<&str, u64> = TableDefinition::new("idempotency");
const TRANSFERS: TableDefinition<u64, &[u8]> = TableDefinition::new("transfers");
const SESSION_TRANSFERS: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("session_transfers");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const ACTIVE: TableDefinition<(u64, &str), ()> = TableDefinition::new("active");

const SESSION_SEQ: &str = "next_session_seq";
const TRANSFER_SEQ: &str = "next_transfer_id";

/// Durable session store on a single redb file.
pub struct RedbSessionStore {
    db: Database,
}

impl std::fmt::Debug for RedbSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSessionStore").finish_non_exhaustive()
    }
}

impl RedbSessionStore {
    /// Open the database at `path`, creating it and its tables if needed.
    pub fn open(path: impl AsRef<Path>) -> FilingResult<Self> {
        let db = Database::create(path.as_ref()).map_err(storage)?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> FilingResult<()> {
        let txn = self.db.begin_write().map_err(storage)?;
        {
            txn.open_table(SESSIONS).map_err(storage)?;
            txn.open_table(TRANSITIONS).map_err(storage)?;
            txn.open_table(IDEMPOTENCY).map_err(storage)?;
            txn.open_table(TRANSFERS).map_err(storage)?;
            txn.open_multimap_table(SESSION_TRANSFERS)
                .map_err(storage)?;
            txn.open_table(META).map_err(storage)?;
            txn.open_table(ACTIVE).map_err(storage)?;
        }
        txn.commit().map_err(storage)
    }

    /// Read-and-bump a counter inside `txn`. Counters start at 1.
    fn bump_counter(txn: &WriteTransaction, name: &str) -> FilingResult<u64> {
        let mut meta = txn.open_table(META).map_err(storage)?;
        let current = meta
            .get(name)
            .map_err(storage)?
            .map(|g| g.value())
            .unwrap_or(1);
        meta.insert(name, current.saturating_add(1))
            .map_err(storage)?;
        Ok(current)
    }
}

/// Move a session's entry in the activity index from `before` to `after`.
/// Archived sessions leave the index for good.
fn reindex(
    active: &mut Table<'_, (u64, &'static str), ()>,
    before: Option<&Session>,
    after: &Session,
) -> FilingResult<()> {
    if let Some(before) = before {
        active
            .remove((before.updated_at.millis(), before.id.as_str()))
            .map_err(storage)?;
    }
    if !after.is_archived() {
        active
            .insert((after.updated_at.millis(), after.id.as_str()), ())
            .map_err(storage)?;
    }
    Ok(())
}

fn load_from<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    id: &SessionId,
) -> FilingResult<Option<Session>> {
    table
        .get(id.as_str())
        .map_err(storage)?
        .map(|guard| decode_record(RecordKind::Session, guard.value()))
        .transpose()
}

impl SessionStore for RedbSessionStore {
    fn next_session_seq(&self) -> FilingResult<u64> {
        let txn = self.db.begin_write().map_err(storage)?;
        let seq = Self::bump_counter(&txn, SESSION_SEQ)?;
        txn.commit().map_err(storage)?;
        Ok(seq)
    }

    fn insert_session(&self, session: &Session) -> FilingResult<()> {
        let bytes = encode_record(RecordKind::Session, session)?;
        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut sessions = txn.open_table(SESSIONS).map_err(storage)?;
            if sessions.get(session.id.as_str()).map_err(storage)?.is_some() {
                return Err(FilingError::SessionExists(session.id.clone()));
            }
            sessions
                .insert(session.id.as_str(), bytes.as_slice())
                .map_err(storage)?;
            let mut active = txn.open_table(ACTIVE).map_err(storage)?;
            reindex(&mut active, None, session)?;
        }
        txn.commit().map_err(storage)
    }

    fn load_session(&self, id: &SessionId) -> FilingResult<Option<Session>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let sessions = txn.open_table(SESSIONS).map_err(storage)?;
        load_from(&sessions, id)
    }

    fn list_sessions(&self) -> FilingResult<Vec<Session>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let sessions = txn.open_table(SESSIONS).map_err(storage)?;
        let mut out = Vec::new();
        for entry in sessions.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            out.push(decode_record(RecordKind::Session, value.value())?);
        }
        Ok(out)
    }

    fn commit_transition(
        &self,
        request: &TransitionRequest,
        apply: &mut ApplyFn<'_>,
    ) -> FilingResult<TransitionOutcome> {
        let key = request.idempotency_key();
        let id = &request.session_id;
        let txn = self.db.begin_write().map_err(storage)?;

        let outcome = {
            let mut sessions = txn.open_table(SESSIONS).map_err(storage)?;
            let mut transitions = txn.open_table(TRANSITIONS).map_err(storage)?;
            let mut keys = txn.open_table(IDEMPOTENCY).map_err(storage)?;
            let mut active = txn.open_table(ACTIVE).map_err(storage)?;

            let session =
                load_from(&sessions, id)?.ok_or_else(|| FilingError::SessionNotFound(id.clone()))?;

            // A committed key means this slot is taken. It is a replay only
            // if the same request took it; anyone else lost the race.
            let committed_step = keys.get(key.as_str()).map_err(storage)?.map(|g| g.value());
            if let Some(step) = committed_step {
                let record: TransitionRecord = transitions
                    .get((id.as_str(), step))
                    .map_err(storage)?
                    .map(|g| decode_record(RecordKind::Transition, g.value()))
                    .transpose()?
                    .filter(|r: &TransitionRecord| r.idempotency_key == key)
                    .ok_or_else(|| {
                        FilingError::Storage(format!(
                            "idempotency key {key} points at missing step {step}"
                        ))
                    })?;
                if record.request_digest != request.digest()? {
                    tracing::debug!(session = %id, step, "different request already committed this step");
                    return Err(FilingError::StaleTransition {
                        expected: request.expected_step,
                        actual: session.step,
                    });
                }
                tracing::debug!(session = %id, step, "replayed transition");
                TransitionOutcome {
                    session,
                    record,
                    replayed: true,
                }
            } else {
                if session.step != request.expected_step {
                    return Err(FilingError::StaleTransition {
                        expected: request.expected_step,
                        actual: session.step,
                    });
                }

                let (next, record) = apply(&session)?;
                let session_bytes = encode_record(RecordKind::Session, &next)?;
                let record_bytes = encode_record(RecordKind::Transition, &record)?;

                sessions
                    .insert(id.as_str(), session_bytes.as_slice())
                    .map_err(storage)?;
                transitions
                    .insert((id.as_str(), record.step), record_bytes.as_slice())
                    .map_err(storage)?;
                keys.insert(record.idempotency_key.as_str(), record.step)
                    .map_err(storage)?;
                reindex(&mut active, Some(&session), &next)?;

                TransitionOutcome {
                    session: next,
                    record,
                    replayed: false,
                }
            }
        };

        if outcome.replayed {
            txn.abort().map_err(storage)?;
        } else {
            txn.commit().map_err(storage)?;
        }
        Ok(outcome)
    }

    fn commit_transfer(
        &self,
        id: &SessionId,
        plan: &mut TransferFn<'_>,
    ) -> FilingResult<(Session, SessionTransfer)> {
        let txn = self.db.begin_write().map_err(storage)?;
        let transfer_id = Self::bump_counter(&txn, TRANSFER_SEQ)?;

        let result = {
            let mut sessions = txn.open_table(SESSIONS).map_err(storage)?;
            let mut transfers = txn.open_table(TRANSFERS).map_err(storage)?;
            let mut index = txn
                .open_multimap_table(SESSION_TRANSFERS)
                .map_err(storage)?;
            let mut active = txn.open_table(ACTIVE).map_err(storage)?;

            let session =
                load_from(&sessions, id)?.ok_or_else(|| FilingError::SessionNotFound(id.clone()))?;
            let (next, transfer) = plan(&session, transfer_id)?;

            let session_bytes = encode_record(RecordKind::Session, &next)?;
            let transfer_bytes = encode_record(RecordKind::Transfer, &transfer)?;
            sessions
                .insert(id.as_str(), session_bytes.as_slice())
                .map_err(storage)?;
            transfers
                .insert(transfer_id, transfer_bytes.as_slice())
                .map_err(storage)?;
            index.insert(id.as_str(), transfer_id).map_err(storage)?;
            reindex(&mut active, Some(&session), &next)?;
            (next, transfer)
        };

        txn.commit().map_err(storage)?;
        Ok(result)
    }

    fn idle_sessions(&self, cutoff: Timestamp) -> FilingResult<Vec<Session>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let active = txn.open_table(ACTIVE).map_err(storage)?;
        let sessions = txn.open_table(SESSIONS).map_err(storage)?;
        let mut out = Vec::new();
        for entry in active
            .range((0u64, "")..(cutoff.millis(), ""))
            .map_err(storage)?
        {
            let (key, _) = entry.map_err(storage)?;
            let (_, id) = key.value();
            let id = SessionId::new(id)?;
            if let Some(session) = load_from(&sessions, &id)? {
                out.push(session);
            }
        }
        Ok(out)
    }

    fn transitions(&self, id: &SessionId) -> FilingResult<Vec<TransitionRecord>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let transitions = txn.open_table(TRANSITIONS).map_err(storage)?;
        let mut out = Vec::new();
        for entry in transitions
            .range((id.as_str(), 0u64)..=(id.as_str(), u64::MAX))
            .map_err(storage)?
        {
            let (_, value) = entry.map_err(storage)?;
            out.push(decode_record(RecordKind::Transition, value.value())?);
        }
        Ok(out)
    }

    fn transfers(&self, id: &SessionId) -> FilingResult<Vec<SessionTransfer>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let index = txn
            .open_multimap_table(SESSION_TRANSFERS)
            .map_err(storage)?;
        let transfers = txn.open_table(TRANSFERS).map_err(storage)?;
        let mut out = Vec::new();
        for transfer_id in index.get(id.as_str()).map_err(storage)? {
            let transfer_id = transfer_id.map_err(storage)?.value();
            if let Some(guard) = transfers.get(transfer_id).map_err(storage)? {
                out.push(decode_record(RecordKind::Transfer, guard.value())?);
            }
        }
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================
