//! API error taxonomy and HTTP mapping.
//!
//! Authentication failures deliberately collapse to one externally
//! observable shape: a caller cannot distinguish a bad token from a bad
//! signature, a stale timestamp, a replayed nonce, or a disabled agent.
//! The specific reason is kept in internal diagnostics only.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input (agent name policy, missing fields, bad payload).
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// Unknown, expired, or exhausted enrollment key.
    #[error("invalid enrollment key")]
    InvalidKey,

    /// Agent name already enrolled for this tenant.
    #[error("agent name conflict")]
    NameConflict,

    /// Any authentication failure. The reason stays server-side.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: &'static str },

    /// Too many requests for this identity and endpoint class.
    #[error("rate limited")]
    RateLimited { retry_after_secs: i64 },

    /// Missing resource, or a job not addressed to the caller.
    #[error("not found")]
    NotFound,

    /// Tenant agent- or job-count quota reached.
    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn unauthorized(reason: &'static str) -> Self {
        ApiError::Unauthorized { reason }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidKey | ApiError::NameConflict => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::QuotaExceeded | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The externally visible message. Generic by design.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "invalid request",
            ApiError::InvalidKey => "invalid or expired enrollment key",
            ApiError::NameConflict => "agent name unavailable",
            ApiError::Unauthorized { .. } => "unauthorized",
            ApiError::RateLimited { .. } => "rate limit exceeded",
            ApiError::NotFound => "not found",
            ApiError::QuotaExceeded => "quota exceeded",
            ApiError::Forbidden => "forbidden",
            ApiError::Internal(_) => "internal error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Unauthorized { reason } => {
                tracing::warn!(reason, "request rejected as unauthorized");
            }
            ApiError::Validation(detail) => {
                tracing::debug!(detail, "request rejected by validation");
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
            }
            _ => {}
        }

        let status = self.status();
        let body = Json(json!({ "error": self.public_message() }));

        if let ApiError::RateLimited { retry_after_secs } = self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}
