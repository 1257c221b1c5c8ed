use crate::error::RetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

impl RetryError {
    pub fn status(&self) -> StatusCode {
        match self {
            RetryError::InvalidRequest(_) | RetryError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            RetryError::PolicyNotFound(_)
            | RetryError::ScheduleNotFound(_)
            | RetryError::AttemptNotFound(_)
            | RetryError::JobNotFound(_) => StatusCode::NOT_FOUND,
            RetryError::AlreadyResolved(_) | RetryError::ClaimConflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RetryError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }
        (
            status,
            Json(json!({"error": {"code": self.code(), "message": self.to_string()}})),
        )
            .into_response()
    }
}
