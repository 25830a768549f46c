use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::domain::TransitionError;
use crate::processor::ProcessorError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server misconfigured: {0}")]
    Misconfigured(String),

    /// Upstream failure; the processor's message is surfaced as-is.
    #[error("{0}")]
    Processor(#[from] ProcessorError),

    #[error("Transaction already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Reader busy: {0}")]
    ReaderBusy(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::Misconfigured(_) | AppError::Processor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AlreadyTerminal(_)
            | AppError::InvalidTransition(_)
            | AppError::ReaderBusy(_) => StatusCode::CONFLICT,
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Validation(msg) => AppError::Validation(msg),
            TransitionError::AlreadyTerminal(state) => AppError::AlreadyTerminal(state.to_string()),
            err @ TransitionError::InvalidTransition { .. } => {
                AppError::InvalidTransition(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
