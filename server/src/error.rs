//! # Gateway Errors
//!
//! One error enum covering every failure disposition, with a single
//! `IntoResponse` impl so handlers just return `Result<_, GatewayError>`
//! and the status code/body follow from the variant instead of being
//! hand-rolled per handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("API key required")]
    AuthMissing,
    #[error("invalid API key")]
    AuthInvalid,

    #[error("tunnel not found")]
    TunnelNotFound,
    #[error("tunnel not active (status: {0})")]
    TunnelNotActive(String),

    #[error("failed to send request to tunnel")]
    SendFailure,
    #[error("request timed out waiting for tunnel response")]
    RequestTimeout,
    #[error("tunnel disconnected while a request was in flight")]
    TunnelDisconnected,
    #[error("tunnel was deleted while a request was in flight")]
    TunnelDeleted,

    #[error("no more tunnel ids available")]
    CapacityExhausted,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::AuthMissing => (StatusCode::UNAUTHORIZED, self.to_string()),
            GatewayError::AuthInvalid => (StatusCode::FORBIDDEN, self.to_string()),
            GatewayError::TunnelNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            GatewayError::TunnelNotActive(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            GatewayError::SendFailure
            | GatewayError::TunnelDisconnected
            | GatewayError::TunnelDeleted => (StatusCode::BAD_GATEWAY, self.to_string()),
            GatewayError::RequestTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            GatewayError::CapacityExhausted => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, Json(json!({ "detail": message }))).into_response()
    }
}
