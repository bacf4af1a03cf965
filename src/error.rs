use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::status::OrderStatus;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("order not found")]
    OrderNotFound,

    #[error("delivery agent not found")]
    AgentNotFound,

    // The version check on persist lost against a concurrent writer.
    #[error("order was modified concurrently, retry the request")]
    WriteConflict,

    #[error("status transition from {from} to {to} is not allowed")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] mongodb::error::Error),
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ServiceError::OrderNotFound | ServiceError::AgentNotFound => StatusCode::NOT_FOUND,
            ServiceError::WriteConflict => StatusCode::CONFLICT,
            ServiceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Every error leaves the service as the standard JSON envelope. Database
// failures are logged in full and surfaced with a generic message.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let message = match &self {
            ServiceError::Database(err) => {
                error!("database error: {err}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (code, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
