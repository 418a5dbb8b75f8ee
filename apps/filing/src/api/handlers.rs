//! Route handlers.
//!
//! Every store call runs on the blocking pool; handlers only parse input,
//! hop to the pool, and shape the response.

use super::AppState;
use super::error::ApiError;
use crate::config::EXPLICIT_ABANDON;
use crate::runtime::mint_session_id;
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use filing_core::{
    AbandonReason, FilingResult, FilingSessionManager, NewSession, ReportView, Session,
    SessionId, SessionTransfer, Tier, TransferReason, TransitionOutcome, TransitionRecord,
    TransitionRequest, Trigger, UserId, WorkflowType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

// =============================================================================
// REQUEST BODIES
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionBody {
    /// Owning user; absent for an anonymous session.
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub workflow: WorkflowType,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionBody {
    pub expected_step: u64,
    pub trigger: Trigger,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AbandonBody {
    pub expected_step: u64,
    #[serde(default)]
    pub reason: Option<AbandonReason>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferBody {
    /// Kept as a raw string so a malformed identity maps to `target_invalid`.
    pub target_user_id: String,
    pub reason: TransferReason,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub session: Session,
    pub transfer: SessionTransfer,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Run `op` against the manager on the blocking pool.
async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&FilingSessionManager) -> FilingResult<T> + Send + 'static,
{
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || op(&manager))
        .await
        .map_err(|e| ApiError::internal(format!("worker failed: {e}")))?
        .map_err(ApiError::from)
}

fn session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::new(raw).map_err(ApiError::from)
}

// =============================================================================
// HANDLERS
// =============================================================================

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// The body is optional: an empty request creates an anonymous unified
/// session.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let body: CreateSessionBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };
    let id = mint_session_id()?;
    let session = blocking(&state, move |m| {
        m.create_session(NewSession {
            id: Some(id),
            owner: body.owner,
            workflow: body.workflow,
        })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let id = session_id(&id)?;
    blocking(&state, move |m| m.session(&id)).await.map(Json)
}

pub async fn post_transition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TransitionBody>, JsonRejection>,
) -> Result<(StatusCode, Json<TransitionOutcome>), ApiError> {
    let id = session_id(&id)?;
    let Json(body) = body?;
    let request = TransitionRequest::new(id, body.expected_step, body.trigger);
    let outcome = blocking(&state, move |m| m.transition(&request)).await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

pub async fn list_transitions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransitionRecord>>, ApiError> {
    let id = session_id(&id)?;
    blocking(&state, move |m| m.history(&id)).await.map(Json)
}

pub async fn abandon(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AbandonBody>, JsonRejection>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let id = session_id(&id)?;
    let Json(body) = body?;
    let reason = body.reason.unwrap_or(EXPLICIT_ABANDON);
    blocking(&state, move |m| m.abandon(&id, body.expected_step, reason))
        .await
        .map(Json)
}

pub async fn transfer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TransferBody>, JsonRejection>,
) -> Result<Json<TransferResponse>, ApiError> {
    let id = session_id(&id)?;
    let Json(body) = body?;
    let (session, transfer) = blocking(&state, move |m| {
        m.transfer(&id, &body.target_user_id, body.reason)
    })
    .await?;
    Ok(Json(TransferResponse { session, transfer }))
}

pub async fn list_transfers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionTransfer>>, ApiError> {
    let id = session_id(&id)?;
    blocking(&state, move |m| m.transfers(&id)).await.map(Json)
}

pub async fn view(
    State(state): State<AppState>,
    path: Result<Path<(String, u8)>, PathRejection>,
) -> Result<Json<ReportView>, ApiError> {
    let Path((id, tier)) = path?;
    let id = session_id(&id)?;
    let tier = Tier::try_from(tier)?;
    blocking(&state, move |m| m.render_view(&id, tier))
        .await
        .map(Json)
}
