//! The façade's error type, mapped to HTTP status codes the same way
//! the relay's own API layer maps its errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
    #[error("rate limit exceeded")]
    RateLimited,
}

impl From<agora_client::ClientError> for ApiError {
    fn from(err: agora_client::ClientError) -> Self {
        match err {
            agora_client::ClientError::NotRegistered => {
                ApiError::BadRequest("relay client is not registered".to_string())
            }
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        };
        let body = Json(serde_json::json!({
            "status": "failed",
            "reason": self.to_string(),
        }));
        (status, body).into_response()
    }
}
