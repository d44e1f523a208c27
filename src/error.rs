// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., duplicate username)
    Conflict(String),

    // 4xx with a stable reason code
    Policy(PolicyViolation),
}

/// Attempt lifecycle rules a caller can break.
/// Never retried; each carries a stable reason code for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    AttemptLimitExceeded,
    QuizNotYetOpen,
    QuizClosed,
    QuizInactive,
    AlreadySubmitted,
    NotOwner,
}

impl PolicyViolation {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyViolation::AttemptLimitExceeded => "attempt_limit_exceeded",
            PolicyViolation::QuizNotYetOpen => "quiz_not_yet_open",
            PolicyViolation::QuizClosed => "quiz_closed",
            PolicyViolation::QuizInactive => "quiz_inactive",
            PolicyViolation::AlreadySubmitted => "already_submitted",
            PolicyViolation::NotOwner => "not_owner",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PolicyViolation::AttemptLimitExceeded => "Max attempts reached",
            PolicyViolation::QuizNotYetOpen => "Quiz not started yet",
            PolicyViolation::QuizClosed => "Quiz is over",
            PolicyViolation::QuizInactive => "Quiz is not active",
            PolicyViolation::AlreadySubmitted => "Quiz already submitted",
            // Same wording as a missing attempt so ids of other users leak nothing.
            PolicyViolation::NotOwner => "Attempt not found",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PolicyViolation::AttemptLimitExceeded
            | PolicyViolation::QuizNotYetOpen
            | PolicyViolation::QuizClosed
            | PolicyViolation::QuizInactive => StatusCode::FORBIDDEN,
            PolicyViolation::AlreadySubmitted => StatusCode::BAD_REQUEST,
            PolicyViolation::NotOwner => StatusCode::NOT_FOUND,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

impl From<PolicyViolation> for AppError {
    fn from(violation: PolicyViolation) -> Self {
        AppError::Policy(violation)
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Policy(violation) => {
                let body = Json(json!({
                    "error": violation.message(),
                    "code": violation.code(),
                }));
                return (violation.status(), body).into_response();
            }
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
