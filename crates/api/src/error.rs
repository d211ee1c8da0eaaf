//! API error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vendorbill_billing::{BillingError, ErrorKind};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PolicyViolation(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        let message = e.to_string();
        match e.kind() {
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::InvalidState => ApiError::Conflict(message),
            ErrorKind::Validation => ApiError::Validation(message),
            ErrorKind::PolicyViolation => ApiError::PolicyViolation(message),
            ErrorKind::Upstream => ApiError::Upstream(message),
            ErrorKind::Store => ApiError::Internal(message),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error while handling request");
                "Internal server error".to_string()
            }
            ApiError::Upstream(detail) => {
                tracing::warn!(error = %detail, "Upstream provider failed");
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
