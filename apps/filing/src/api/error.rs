//! HTTP error envelope.
//!
//! ```json
//! {"error": {"code": "stale_transition", "message": "...", "details": {"expected": 2, "actual": 3}}}
//! ```

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use filing_core::{FieldKey, FilingError};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: "missing or invalid bearer token".into(),
            details: json!({}),
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "rate_limited",
            message: "too many requests".into(),
            details: json!({}),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
            details: json!({}),
        }
    }
}

fn status_for(err: &FilingError) -> StatusCode {
    match err {
        FilingError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        FilingError::InvalidTransition { .. }
        | FilingError::StaleTransition { .. }
        | FilingError::AlreadyOwned { .. }
        | FilingError::SessionAbandoned(_)
        | FilingError::SessionExists(_) => StatusCode::CONFLICT,
        FilingError::PreconditionFailed { .. }
        | FilingError::RetryBudgetExhausted { .. }
        | FilingError::InsufficientData { .. }
        | FilingError::TargetInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FilingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FilingError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        FilingError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn details_for(err: &FilingError) -> Value {
    match err {
        FilingError::InvalidTransition { from, to } => json!({ "from": from, "to": to }),
        FilingError::StaleTransition { expected, actual } => {
            json!({ "expected": expected, "actual": actual })
        }
        FilingError::PreconditionFailed { from, to, reason } => {
            json!({ "from": from, "to": to, "reason": reason })
        }
        FilingError::RetryBudgetExhausted { attempts, budget } => {
            json!({ "attempts": attempts, "budget": budget })
        }
        FilingError::InsufficientData { missing } => {
            let missing: Vec<&str> = missing.iter().map(FieldKey::as_str).collect();
            json!({ "missing": missing })
        }
        FilingError::AlreadyOwned { owner } => json!({ "owner": owner }),
        FilingError::SessionNotFound(id)
        | FilingError::SessionExists(id)
        | FilingError::SessionAbandoned(id) => json!({ "session_id": id }),
        _ => json!({}),
    }
}

impl From<FilingError> for ApiError {
    fn from(err: FilingError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(code = err.code(), "{err}");
        }
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            details: details_for(&err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filing_core::{FilingState, SessionId};

    #[test]
    fn typed_errors_map_to_documented_statuses() {
        let cases = [
            (
                FilingError::SessionNotFound(SessionId::sequential(1)),
                StatusCode::NOT_FOUND,
            ),
            (
                FilingError::StaleTransition {
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                FilingError::InvalidTransition {
                    from: FilingState::Complete,
                    to: FilingState::Extract,
                },
                StatusCode::CONFLICT,
            ),
            (
                FilingError::InsufficientData { missing: vec![] },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                FilingError::TargetInvalid("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                FilingError::Storage("disk".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn stale_details_carry_both_steps() {
        let api = ApiError::from(FilingError::StaleTransition {
            expected: 4,
            actual: 5,
        });
        assert_eq!(api.code, "stale_transition");
        assert_eq!(api.details, json!({ "expected": 4, "actual": 5 }));
    }
}
