//! Web server module for receiving workflow job webhooks.
//!
//! This module provides a single webhook route that:
//! - Checks the event type and the HMAC signature
//! - Decodes the job event only once it is authenticated
//! - Publishes or drains one pool message depending on the action
//!
//! plus a health check for the platform.

pub mod error;
pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::WebhookError;
pub use handlers::{
    health, workflow_job_webhook, AppState, HealthResponse, JsonResponse, EVENT_HEADER,
    SIGNATURE_HEADER, WORKFLOW_JOB_EVENT,
};
pub use signature::{sign, verify_signature, SIGNATURE_PREFIX};

/// Build the router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(workflow_job_webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
