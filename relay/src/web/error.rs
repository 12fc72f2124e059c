//! Ingress error taxonomy and its HTTP mapping.
//!
//! | Error | Status |
//! |-------|--------|
//! | bad event type, bad signature | 400 |
//! | unreadable or undecodable body | 400 |
//! | queue publish / pull / ack failure | 500 |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::web::handlers::JsonResponse;

/// Terminal failure for a single webhook request.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid event type")]
    InvalidEventType,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("failed to read body: {0}")]
    ReadBody(String),

    #[error("failed to unmarshal json: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::InvalidEventType
            | WebhookError::InvalidSignature
            | WebhookError::ReadBody(_)
            | WebhookError::Decode(_) => StatusCode::BAD_REQUEST,
            WebhookError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status(), Json(JsonResponse::error(self.to_string()))).into_response()
    }
}
