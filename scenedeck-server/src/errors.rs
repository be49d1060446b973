use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scenedeck_core::ProcessError;
use serde_json::json;
use tracing::error;

/// Wraps the core error taxonomy for HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub ProcessError);

impl From<ProcessError> for ApiError {
    fn from(e: ProcessError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProcessError::Validation(_) => StatusCode::BAD_REQUEST,
            ProcessError::NotFound(_) => StatusCode::NOT_FOUND,
            ProcessError::Forbidden(_) => StatusCode::FORBIDDEN,
            ProcessError::Conflict(_) | ProcessError::Cancelled(_) => StatusCode::CONFLICT,
            ProcessError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            ProcessError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProcessError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProcessError::Io(_) | ProcessError::Serialization(_) | ProcessError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
