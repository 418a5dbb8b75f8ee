//! Process-level collaborators: the wall clock, opaque session ids, and
//! manager construction over a redb file.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use filing_core::{
    Clock, EventSink, FilingError, FilingResult, FilingSessionManager, ManagerConfig,
    RedbSessionStore, SessionId, Timestamp,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Random bytes in a minted session id (128 bits).
const SESSION_ID_ENTROPY: usize = 16;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// An unguessable session id: `fs-` followed by 22 URL-safe characters.
pub fn mint_session_id() -> FilingResult<SessionId> {
    let mut bytes = [0u8; SESSION_ID_ENTROPY];
    getrandom::fill(&mut bytes)
        .map_err(|e| FilingError::Storage(format!("entropy source unavailable: {e}")))?;
    SessionId::new(format!("fs-{}", URL_SAFE_NO_PAD.encode(bytes)))
}

/// Open (or create) the database at `path` and wrap it in a manager.
pub fn open_manager(
    path: &Path,
    config: ManagerConfig,
    events: Arc<dyn EventSink>,
) -> FilingResult<FilingSessionManager> {
    let store = RedbSessionStore::open(path)?;
    tracing::debug!(path = %path.display(), "session store opened");
    Ok(FilingSessionManager::new(
        Arc::new(store),
        Arc::new(SystemClock),
        events,
        config,
    ))
}
