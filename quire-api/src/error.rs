//! API error handling.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use quire_core::error::QuireError;

/// Message returned when a follower gives up on an in-flight render.
pub const IN_PROGRESS_MESSAGE: &str = "Rendering is in progress. Try again later.";

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: String,
    retry_after: Option<u64>,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            retry_after: None,
        }
    }

    /// Bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_ERROR")
    }

    /// An identical render is still running; the client should retry.
    pub fn in_progress(retry_after_seconds: u64) -> Self {
        let mut err = Self::new(StatusCode::SERVICE_UNAVAILABLE, IN_PROGRESS_MESSAGE, "RENDER_IN_PROGRESS");
        err.retry_after = Some(retry_after_seconds.max(1));
        err
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after;
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<QuireError> for ApiError {
    fn from(err: QuireError) -> Self {
        match &err {
            QuireError::WaitTimeout { waited_ms, .. } => {
                ApiError::in_progress(waited_ms / 1000)
            }
            QuireError::RenderTimeout { .. } => {
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, err.to_string(), "RENDER_TIMEOUT")
            }
            QuireError::RenderFailed(_) => {
                tracing::warn!(error = %err, "Render failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), "RENDER_FAILED")
            }
            _ if err.is_client_error() => ApiError::bad_request(err.to_string()),
            _ => {
                tracing::error!(error = %err, "Internal error");
                ApiError::internal("An internal error occurred")
            }
        }
    }
}
