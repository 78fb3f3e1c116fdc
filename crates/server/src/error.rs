// crates/server/src/error.rs
//! HTTP error mapping for the bench API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use benchstream_core::StoreError;
use benchstream_types::JobId;
use serde::Serialize;
use thiserror::Error;

/// JSON body of every non-2xx API response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Set when the same request may succeed once the store recovers.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl ErrorResponse {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            job_id: None,
            retryable: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// Payload validation failure; the message is returned verbatim.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::JobNotFound(job_id) => {
                tracing::debug!(job_id = %job_id, "Unknown job requested");
                ErrorResponse {
                    job_id: Some(job_id),
                    ..ErrorResponse::message("not found")
                }
            }
            ApiError::BadRequest(msg) => {
                tracing::debug!(reason = %msg, "Rejected bench request");
                ErrorResponse::message(msg)
            }
            ApiError::Store(e) => {
                tracing::warn!(error = %e, "Store call failed while serving request");
                ErrorResponse {
                    retryable: e.is_transient(),
                    ..ErrorResponse::message("store error")
                }
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error while serving request");
                ErrorResponse::message("internal error")
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
