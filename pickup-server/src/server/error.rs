use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Request-level failures. `Display` is the message the client sees.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Username already exists")]
    DuplicateUsername,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Child not found")]
    ChildNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid event type")]
    InvalidEventType,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Access denied. No token provided.")]
    Unauthorized,
    #[error("Invalid token.")]
    InvalidToken,
    #[error("Access denied. You do not have permission.")]
    Forbidden,
    /// Detail is logged, never returned.
    #[error("Internal server error")]
    StoreFailure(String),
    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::DuplicateUsername
            | AppError::PasswordMismatch
            | AppError::InvalidEventType
            | AppError::InvalidInput(_)
            | AppError::InvalidToken => StatusCode::BAD_REQUEST,
            AppError::ChildNotFound | AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::StoreFailure(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            AppError::StoreFailure(d) | AppError::Internal(d) => Some(d),
            _ => None,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::UsernameTaken(_) => AppError::DuplicateUsername,
            other => AppError::StoreFailure(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        AppError::InvalidInput(format!("Invalid request: {}", value.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = self.to_string();
        // Do not leak internal error details to clients, but log them
        match self.detail() {
            Some(detail) => {
                tracing::error!(status = %status, message = %msg, detail = %detail, "request failed")
            }
            None => tracing::warn!(status = %status, message = %msg, "request rejected"),
        }
        (status, axum::Json(ErrorBody { error: msg })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn gate_errors_use_distinct_statuses() {
        let (s, b) = body_json(AppError::Unauthorized).await;
        assert_eq!(s, StatusCode::UNAUTHORIZED);
        assert_eq!(b["error"], "Access denied. No token provided.");
        assert_eq!(AppError::InvalidToken.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn internal_detail_is_not_returned() {
        let (s, b) = body_json(AppError::StoreFailure("disk I/O error at /var/db".into())).await;
        assert_eq!(s, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(b["error"], "Internal server error");
    }

    #[test]
    fn taken_username_maps_to_duplicate() {
        let err: AppError = StorageError::UsernameTaken("bob".into()).into();
        assert!(matches!(err, AppError::DuplicateUsername));
        let err: AppError = StorageError::Migration("boom".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
