use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::{response::ApiResponse, validation::FieldError};

/// Errors surfaced to HTTP callers of the ingestion API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication failed")]
    Authentication,

    #[error("Payload invalid")]
    Validation(Vec<FieldError>),

    #[error("Message broker unavailable: {0}")]
    Publish(String),

    #[error("Device lookup failed: {0}")]
    Lookup(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_payload(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Authentication => (StatusCode::UNAUTHORIZED, "authentication_failed"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "payload_invalid"),
            AppError::Publish(_) => (StatusCode::SERVICE_UNAVAILABLE, "publish_failed"),
            AppError::Lookup(_) => (StatusCode::SERVICE_UNAVAILABLE, "lookup_failed"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = self.to_string();
        let body = match self {
            AppError::Validation(errors) => {
                ApiResponse::<()>::error(code.to_string(), message).with_field_errors(errors)
            }
            _ => ApiResponse::<()>::error(code.to_string(), message),
        };

        (status, Json(body)).into_response()
    }
}

/// Broker-side failures seen by consumers and publishers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("broker channel error: {0}")]
    Channel(String),

    #[error("publish to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("unrecoverable dispatcher error: {0}")]
    Unrecoverable(String),
}

impl DispatchError {
    /// Whether the supervisor should reconnect rather than give up.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DispatchError::Unrecoverable(_))
    }
}

/// Failure of a single channel action on one message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("message is missing {0}")]
    MissingField(&'static str),

    #[error("downstream call failed: {0}")]
    Upstream(String),
}
