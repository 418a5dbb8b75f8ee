//! Bearer-token authentication and global rate limiting.

use super::AppState;
use super::error::ApiError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

/// Reject requests without the configured bearer token. A no-op when no
/// key is configured.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Constant-time comparison so the key cannot be recovered by timing.
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "rejected request with bad api key");
        ApiError::unauthorized().into_response()
    }
}

/// Shed load above the configured request rate.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match &state.limiter {
        Some(limiter) if limiter.check().is_err() => ApiError::rate_limited().into_response(),
        _ => next.run(request).await,
    }
}
