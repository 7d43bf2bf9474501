//! Centralized error type for the operator API.
//!
//! Logs full detail server-side and returns a sanitized JSON body. The
//! trap surface never uses this — a honeypot answers every probe with its
//! scripted response, not with error plumbing.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("row not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(code = self.error_code(), "API error ({}): {}", status.as_u16(), self);

        // Sanitized message — internals stay in the log.
        let message = match &self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::NotFound(_) => "Resource not found".to_string(),
            ApiError::Unauthorized(m) => m.clone(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        };

        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}
