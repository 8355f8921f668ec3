//! Error taxonomy for the HTTP surface.
//!
//! Every client-visible failure lands in one of these buckets and renders as
//! `{"detail": <reason>}` with the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The named file or knowledge base does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The request itself is malformed (bad mode, empty query, bad name).
    #[error("{0}")]
    InvalidArgument(String),
    /// The request conflicts with existing state (duplicate knowledge base).
    #[error("{0}")]
    Conflict(String),
    /// The retrieval engine is unreachable or answered with an error.
    #[error("{0}")]
    UpstreamUnavailable(String),
    /// Local failure (disk I/O, poisoned lock).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
