use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use harness_core::HarnessError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub code: &'static str,
    pub message: String,
}

/// Ошибка handler'а: HTTP status + JSON тело `{ok: false, code, message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                ok: false,
                code,
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<HarnessError> for ApiError {
    fn from(e: HarnessError) -> Self {
        match e {
            HarnessError::InvalidParameters(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_parameters", e.to_string())
            }
            HarnessError::State(_) => Self::new(StatusCode::CONFLICT, "run_active", e.to_string()),
            HarnessError::Transport { .. } => {
                tracing::error!(error = %e, "transport error");
                Self::new(StatusCode::BAD_GATEWAY, "transport", e.to_string())
            }
        }
    }
}

/// Битое тело запроса: run не начинается.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "malformed_body", rejection.body_text())
    }
}
