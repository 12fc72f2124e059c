//! Queue client module.
//!
//! The relay uses a queue subscription as a counting semaphore: publishing a
//! message increments the pool, pulling and acknowledging one decrements it.
//! This module defines the three-operation client contract and its
//! transports:
//! - `pubsub`: Google Pub/Sub REST API over reqwest
//! - `amqp`: RabbitMQ over lapin
//!
//! Delivery is at-least-once and nothing here retries. A failed call is
//! returned to the caller as-is.

pub mod amqp;
pub mod pubsub;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, QueueBackend};

pub use amqp::AmqpClient;
pub use pubsub::PubSubClient;
pub use types::{AckHandle, QueueMessage, ReceivedMessage, RUN_ID_ATTRIBUTE, RUN_URL_ATTRIBUTE};

/// Upper bound on how much of an error response body is kept.
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("bad response from server on {operation} ({status}): {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to make {operation} request: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("amqp {operation} failed: {source}")]
    Amqp {
        operation: &'static str,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to encode {operation} request: {source}")]
    Encode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {operation} response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid ack handle: {0}")]
    InvalidAckHandle(String),
}

/// Minimal publish / pull / acknowledge client.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Publish a batch of messages. The batch succeeds or fails as a whole.
    async fn publish(&self, topic: &str, messages: &[QueueMessage]) -> Result<(), QueueError>;

    /// Pull at most one message. `Ok(None)` means nothing is available.
    async fn pull(&self, subscription: &str) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Acknowledge exactly one pulled message.
    async fn ack(&self, subscription: &str, handle: &AckHandle) -> Result<(), QueueError>;

    /// Publish a single message.
    async fn publish_one(&self, topic: &str, message: QueueMessage) -> Result<(), QueueError> {
        self.publish(topic, std::slice::from_ref(&message)).await
    }

    /// Pull one message and acknowledge it before returning it.
    ///
    /// An empty subscription returns `Ok(None)` without calling `ack`. If the
    /// ack fails the message stays unacknowledged and the error is returned;
    /// the queue service redelivers it after its own visibility timeout.
    async fn pull_and_ack(&self, subscription: &str) -> Result<Option<QueueMessage>, QueueError> {
        let Some(received) = self.pull(subscription).await? else {
            return Ok(None);
        };

        self.ack(subscription, &received.ack_handle).await?;

        Ok(Some(received.message))
    }

    /// Release transport resources. Called once at shutdown.
    async fn close(&self) {}
}

/// Run a queue operation under a deadline.
///
/// The inner future is dropped when the deadline passes, which aborts any
/// in-flight network call.
pub async fn with_deadline<F, T>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::Timeout { operation, after }),
    }
}

/// Build the queue client selected by configuration.
pub fn connect(config: &Config) -> Result<Arc<dyn QueueClient>, QueueError> {
    let client: Arc<dyn QueueClient> = match config.queue_backend {
        QueueBackend::PubSub => Arc::new(PubSubClient::new(
            config.pubsub_endpoint.clone(),
            config.pubsub_access_token.clone(),
            config.queue_timeout(),
        )?),
        QueueBackend::Amqp => Arc::new(AmqpClient::new(config.amqp_url.clone())),
    };

    info!(backend = ?config.queue_backend, "queue_client_created");

    Ok(client)
}

/// Decode an error body lossily and keep at most [`MAX_ERROR_BODY_BYTES`]
/// of it, cut on a char boundary.
pub(crate) fn error_excerpt(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_ERROR_BODY_BYTES);
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();

    // A split multi-byte char decodes to U+FFFD, which is wider than the bytes it replaced.
    let mut cut = text.len().min(MAX_ERROR_BODY_BYTES);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}
