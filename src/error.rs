// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
///
/// Every variant is recoverable by the caller; the request layer maps each
/// kind to a status code here. Unexpected failures during a mutating
/// operation roll back the whole transaction before surfacing as `Internal`.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    Internal(String),

    // 400 Bad Request (malformed input, out-of-range grade)
    Validation(String),

    // 401 Unauthorized
    Auth(String),

    // 403 Forbidden (caller lacks role or ownership)
    Permission(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (duplicate resource, e.g. double certificate issuance)
    Conflict(String),

    // 409 Conflict (operation not valid for current lifecycle state)
    InvalidState(String),

    // 409 Conflict (attempt cap reached)
    LimitExceeded(String),

    // 409 Conflict (quiz time limit breached at submit)
    TimeExceeded(String),
}

impl AppError {
    /// Stable machine-readable kind for the response body.
    fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal",
            AppError::Validation(_) => "validation_error",
            AppError::Auth(_) => "auth_error",
            AppError::Permission(_) => "permission_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidState(_) => "invalid_state",
            AppError::LimitExceeded(_) => "limit_exceeded",
            AppError::TimeExceeded(_) => "time_exceeded",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, error_message) = match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Permission(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg)
            | AppError::InvalidState(msg)
            | AppError::LimitExceeded(msg)
            | AppError::TimeExceeded(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError`.
///
/// Unique-constraint violations are the storage-level guard for the
/// at-most-one invariants (in-progress attempt, certificate per course,
/// achievement per student); they surface as `Conflict` so a lost
/// check-then-act race still produces a sensible response.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return AppError::Conflict("Resource already exists".to_string());
            }
        }
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}
