//! Webhook endpoint handlers.
//!
//! The webhook handler runs these steps in order and stops at the first
//! failure:
//! 1. Check the event type header (body untouched)
//! 2. Read the body, truncated at the configured cap
//! 3. Verify the HMAC signature over the raw bytes
//! 4. Decode the JSON payload
//! 5. Dispatch the action to the queue

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::HeaderMap,
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::event::InboundEvent;
use crate::queue::QueueClient;
use crate::web::error::WebhookError;
use crate::web::signature::verify_signature;
use crate::Config;

/// Header naming the webhook event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Event type accepted by the relay.
pub const WORKFLOW_JOB_EVENT: &str = "workflow_job";

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Config, queue: Arc<dyn QueueClient>) -> Self {
        let dispatcher = Dispatcher::new(
            queue,
            config.topic.clone(),
            config.subscription.clone(),
            config.queue_timeout(),
        );

        Self {
            config: Arc::new(config),
            dispatcher,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Workflow Job Webhook
// =============================================================================

/// Webhook response. At most one of the fields is set.
#[derive(Debug, Serialize)]
pub struct JsonResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JsonResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Workflow job webhook endpoint.
pub async fn workflow_job_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<JsonResponse>, WebhookError> {
    if !is_workflow_job_event(&headers) {
        warn!(
            event = headers
                .get(EVENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            "webhook_invalid_event_type"
        );
        return Err(WebhookError::InvalidEventType);
    }

    let body = read_body(
        body,
        state.config.max_body_bytes,
        state.config.body_read_timeout(),
    )
    .await
    .inspect_err(|e| error!(error = %e, "webhook_read_body_failed"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !verify_signature(&state.config.webhook_secret, signature, &body) {
        return Err(WebhookError::InvalidSignature);
    }

    // Authenticated from here on; safe to decode.
    let event: InboundEvent = serde_json::from_slice(&body).map_err(|e| {
        error!(error = %e, "webhook_decode_failed");
        WebhookError::Decode(e)
    })?;

    info!(
        action = %event.action.as_str(),
        run_id = %event.workflow_job.run_id,
        repository = %event.repository.full_name,
        body_length = body.len(),
        "webhook_received"
    );

    state
        .dispatcher
        .dispatch(&event)
        .await
        .inspect_err(|e| error!(error = %e, action = %event.action.as_str(), "webhook_dispatch_failed"))?;

    Ok(Json(JsonResponse::message("ok")))
}

/// Check the request is a `workflow_job` event, so the body is worth reading.
fn is_workflow_job_event(headers: &HeaderMap) -> bool {
    headers
        .get(EVENT_HEADER)
        .map(|v| v.as_bytes() == WORKFLOW_JOB_EVENT.as_bytes())
        .unwrap_or(false)
}

/// Read at most `limit` bytes of the body within `deadline`.
///
/// Bytes beyond `limit` are dropped, not reported; a truncated payload
/// shows up later as a signature or decode failure.
async fn read_body(body: Body, limit: usize, deadline: Duration) -> Result<Vec<u8>, WebhookError> {
    let read = async {
        let mut stream = body.into_data_stream();
        let mut buf = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| WebhookError::ReadBody(e.to_string()))?;
            let remaining = limit - buf.len();
            if chunk.len() >= remaining {
                buf.extend_from_slice(&chunk[..remaining]);
                break;
            }
            buf.extend_from_slice(&chunk);
        }

        Ok::<_, WebhookError>(buf)
    };

    match tokio::time::timeout(deadline, read).await {
        Ok(result) => result,
        Err(_) => Err(WebhookError::ReadBody(format!(
            "timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}
