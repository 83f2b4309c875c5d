//! HTTP-facing error type
//!
//! Every failed request is answered with `{"success": false, "message": ...}`;
//! failures coming out of the key pool also carry a `cause` label.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors returned by route handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request failed validation or could not be parsed.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Route not found")]
    NotFound,

    #[error(transparent)]
    Pool(#[from] key_pool::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Pool(key_pool::Error::NoKeyAvailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Pool(err) => serde_json::json!({
                "success": false,
                "message": err.to_string(),
                "cause": err.cause(),
            }),
            other => serde_json::json!({
                "success": false,
                "message": other.to_string(),
            }),
        };
        (status, axum::Json(body)).into_response()
    }
}
