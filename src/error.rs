//! Service-level error handling.
//!
//! Every failure that can cross the HTTP boundary funnels into [`ApiError`] so
//! that status mapping, logging, and client-safe rendering happen in exactly
//! one place. Domain code builds these through the constructor helpers rather
//! than naming variants directly.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Convenience alias used by fallible functions across the crate.
pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self::TooManyRequests(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status this error renders as.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that may be returned to clients.
    ///
    /// Client errors carry their real message; server errors are replaced with
    /// a generic one so upstream bodies and internal details never leak
    /// through the API. The full error is still logged with its `error_id`.
    #[must_use]
    pub fn safe_message(&self) -> String {
        if self.status_code().is_server_error() {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        }
    }
}

/// JSON body rendered for failed requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                error_id = %error_id,
                status = %status,
                error = %self,
                "request failed"
            );
        } else {
            tracing::debug!(
                error_id = %error_id,
                status = %status,
                error = %self,
                "request rejected"
            );
        }

        let body = ErrorResponse {
            error: self.safe_message(),
            error_id: Some(error_id),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::BadRequest(format!("Invalid JSON: {err}"))
        } else {
            Self::Internal(format!("JSON serialization failed: {err}"))
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::RequestTimeout;
        }
        if err.is_connect() {
            return Self::ServiceUnavailable("Upstream connection failed".to_string());
        }
        if let Some(status) = err.status() {
            return match status.as_u16() {
                401 => Self::Unauthorized("Upstream rejected credentials".to_string()),
                403 => Self::Forbidden("Upstream denied access".to_string()),
                404 => Self::NotFound("Upstream resource not found".to_string()),
                429 => Self::TooManyRequests("Upstream rate limit exceeded".to_string()),
                500..=599 => Self::ServiceUnavailable(format!("Upstream returned {status}")),
                _ => Self::Internal(format!("Upstream returned {status}")),
            };
        }
        Self::Internal(format!("Upstream request failed: {err}"))
    }
}
