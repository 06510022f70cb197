//! Handler error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use grantflow_core::GrantError;
use grantflow_rules::ProfileError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Grant(#[from] GrantError),

    #[error("{0}")]
    Profile(#[from] ProfileError),

    #[error("webhook delivery is not configured (set WEBHOOK_URL)")]
    DeliveryDisabled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Grant(err) => match err {
                GrantError::Transport { .. } => StatusCode::BAD_GATEWAY,
                GrantError::DeliveryRejected { .. } => StatusCode::BAD_GATEWAY,
                GrantError::NotFound(_) => StatusCode::NOT_FOUND,
                GrantError::Validation(_) | GrantError::MalformedRecord { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                GrantError::PersistenceConflict { .. } => StatusCode::CONFLICT,
                GrantError::Storage(_) | GrantError::Serialize(_) | GrantError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Profile(err) => match err {
                ProfileError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ProfileError::NotFound(_) => StatusCode::NOT_FOUND,
                ProfileError::Yaml(_) | ProfileError::Json(_) => StatusCode::BAD_REQUEST,
                ProfileError::Io(_) | ProfileError::Notify(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::DeliveryDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::warn!(status = code.as_u16(), error = %self, "request failed");
        }
        let body = ErrorBody { error: self.to_string() };
        (code, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
