use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::dispatcher::SubmitError;
use crate::services::queue::QueueError;

/// Error returned by HTTP handlers, rendered as `{"error", "code"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported image format")]
    UnsupportedMedia,

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("Job store unavailable: {0}")]
    Store(#[from] QueueError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::UnsupportedMedia => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                self.to_string(),
            ),
            ApiError::Submit(SubmitError::MissingInput) => {
                (StatusCode::BAD_REQUEST, "MISSING_INPUT", self.to_string())
            }
            ApiError::Submit(SubmitError::Store(e)) | ApiError::Store(e) => {
                tracing::error!(error = %e, "Job store request failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "Job store unavailable".to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}
