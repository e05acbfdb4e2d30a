use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use boardwalk_core::{SessionId, ValidationError};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("invalid session document: {0}")]
    Invalid(#[from] ValidationError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),
    /// The actor left the registry before answering; callers route again.
    #[error("session actor retired")]
    Retired,
}

/// HTTP-facing error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Coordinator(err) => match err {
                CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
                CoordinatorError::Invalid(_) => StatusCode::BAD_REQUEST,
                CoordinatorError::Persistence(_)
                | CoordinatorError::Unavailable(_)
                | CoordinatorError::Retired => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Coordinator(CoordinatorError::NotFound(_)) => "not_found",
            ApiError::Coordinator(CoordinatorError::Invalid(err)) => err.code(),
            ApiError::Coordinator(CoordinatorError::Persistence(_)) => "persistence_failed",
            ApiError::Coordinator(_) => "session_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (status, body).into_response()
    }
}
