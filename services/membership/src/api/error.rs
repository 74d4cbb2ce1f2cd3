//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every endpoint returns the
//! same `{code, message, request_id}` body, and maps the membership error
//! taxonomy onto status codes.
//!
//! # Key invariants and assumptions
//! - The status for a [`MembershipError`] is chosen by an exhaustive match on
//!   its [`ErrorKind`]; adding a kind fails to compile until it is mapped here.
//! - `compensation_failed` keeps its own code and is logged at error level.
//!
//! # Security considerations
//! - Infrastructure failures log details server-side and return a generic
//!   message; provider responses may contain internal URLs or ids.
use crate::api::types::ErrorResponse;
use crate::error::{ErrorKind, MembershipError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use membership::api::error::ApiError;
/// use membership::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         code: "not_found".to_string(),
///         message: "missing".to_string(),
///         request_id: None,
///     },
/// };
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// Build a 404 Not Found error.
///
/// # Errors
/// - Does not fail.
pub fn api_not_found(message: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Build a 409 Conflict error with a caller-provided code.
///
/// # Errors
/// - Does not fail.
pub fn api_conflict(code: &str, message: &str) -> ApiError {
    api_error(StatusCode::CONFLICT, code, message)
}

/// Build a 500 Internal Server Error.
///
/// # Errors
/// - Does not fail.
pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 401 Unauthorized error for requests without a caller identity.
///
/// # Errors
/// - Does not fail.
pub fn api_unauthorized(message: &str) -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// Build a 403 Forbidden error.
///
/// # Errors
/// - Does not fail.
pub fn api_forbidden(message: &str) -> ApiError {
    api_error(StatusCode::FORBIDDEN, "forbidden", message)
}

/// Build a 400 Bad Request validation error.
///
/// # Errors
/// - Does not fail.
pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Status and code for each error kind.
pub fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_error"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::AccessDenied => (StatusCode::FORBIDDEN, "forbidden"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorKind::AllAlreadyEnrolled => (StatusCode::CONFLICT, "all_members_already_exist"),
        ErrorKind::NoneMatched => (StatusCode::NOT_FOUND, "members_not_found"),
        ErrorKind::Infrastructure => (StatusCode::BAD_GATEWAY, "infrastructure"),
        ErrorKind::CompensationFailed => {
            (StatusCode::INTERNAL_SERVER_ERROR, "compensation_failed")
        }
        ErrorKind::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
    }
}

impl From<MembershipError> for ApiError {
    fn from(err: MembershipError) -> Self {
        let kind = err.kind();
        let (status, code) = status_for(kind);
        let message = match kind {
            ErrorKind::Infrastructure => {
                tracing::warn!(error = %err, "identity infrastructure failure");
                "identity provider or storage is unavailable".to_string()
            }
            ErrorKind::CompensationFailed => {
                tracing::error!(alert = "orphaned_account", error = %err, "request left an orphaned account");
                err.to_string()
            }
            _ => err.to_string(),
        };
        api_error(status, code, &message)
    }
}
