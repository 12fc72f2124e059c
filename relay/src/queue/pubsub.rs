//! Google Pub/Sub REST transport.
//!
//! Talks to `{endpoint}/{topic}:publish`, `{endpoint}/{subscription}:pull`
//! and `{endpoint}/{subscription}:acknowledge`. Topic and subscription names
//! are fully qualified, e.g. `projects/p/topics/t`.
//!
//! Credentials are ambient: either an optional bearer token, or an endpoint
//! (emulator, auth proxy) that needs none.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::{
    error_excerpt, AckHandle, QueueClient, QueueError, QueueMessage, ReceivedMessage,
    MAX_ERROR_BODY_BYTES,
};

/// Pub/Sub client sharing one HTTP connection pool across requests.
#[derive(Clone)]
pub struct PubSubClient {
    http: Client,
    endpoint: String,
    access_token: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_time: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
    /// Answer at once when nothing is available instead of long-polling.
    return_immediately: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    #[serde(default)]
    message: WireMessage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: [&'a str; 1],
}

impl From<&QueueMessage> for WireMessage {
    fn from(message: &QueueMessage) -> Self {
        WireMessage {
            data: (!message.data.is_empty()).then(|| STANDARD.encode(&message.data)),
            attributes: message.attributes.clone(),
            message_id: None,
            publish_time: None,
        }
    }
}

impl TryFrom<WireMessage> for QueueMessage {
    type Error = QueueError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let data = match wire.data {
            Some(encoded) => STANDARD.decode(encoded).map_err(|e| QueueError::Decode {
                operation: "pull",
                reason: format!("message data is not base64: {}", e),
            })?,
            None => Vec::new(),
        };

        Ok(QueueMessage {
            data,
            attributes: wire.attributes,
            message_id: wire.message_id,
            publish_time: wire.publish_time,
        })
    }
}

impl PubSubClient {
    /// Create a client for the given REST endpoint.
    ///
    /// `timeout` bounds each HTTP request at the transport level.
    pub fn new(
        endpoint: String,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, QueueError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|source| QueueError::Transport {
                operation: "connect",
                source,
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn url(&self, resource: &str, verb: &str) -> String {
        format!("{}/{}:{}", self.endpoint, resource, verb)
    }

    async fn post<B: Serialize>(
        &self,
        operation: &'static str,
        url: String,
        body: &B,
    ) -> Result<Response, QueueError> {
        let body = serde_json::to_vec(body).map_err(|source| QueueError::Encode { operation, source })?;

        let mut request = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|source| QueueError::Transport { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueueError::Status {
                operation,
                status: status.as_u16(),
                body: read_excerpt(response).await,
            });
        }

        Ok(response)
    }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of a response body.
async fn read_excerpt(mut response: Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    error_excerpt(&buf)
}

async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> Result<T, QueueError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|source| QueueError::Transport { operation, source })?;
    serde_json::from_slice(&bytes).map_err(|e| QueueError::Decode {
        operation,
        reason: e.to_string(),
    })
}

#[async_trait]
impl QueueClient for PubSubClient {
    async fn publish(&self, topic: &str, messages: &[QueueMessage]) -> Result<(), QueueError> {
        let request = PublishRequest {
            messages: messages.iter().map(WireMessage::from).collect(),
        };

        self.post("publish", self.url(topic, "publish"), &request)
            .await?;

        debug!(topic = %topic, count = messages.len(), "pubsub_published");
        Ok(())
    }

    async fn pull(&self, subscription: &str) -> Result<Option<ReceivedMessage>, QueueError> {
        let response = self
            .post(
                "pull",
                self.url(subscription, "pull"),
                &PullRequest {
                    max_messages: 1,
                    return_immediately: true,
                },
            )
            .await?;

        let pulled: PullResponse = decode("pull", response).await?;

        let Some(received) = pulled.received_messages.into_iter().next() else {
            debug!(subscription = %subscription, "pubsub_pull_empty");
            return Ok(None);
        };

        Ok(Some(ReceivedMessage {
            ack_handle: AckHandle::new(received.ack_id),
            message: received.message.try_into()?,
        }))
    }

    async fn ack(&self, subscription: &str, handle: &AckHandle) -> Result<(), QueueError> {
        let request = AcknowledgeRequest {
            ack_ids: [handle.as_str()],
        };

        self.post("ack", self.url(subscription, "acknowledge"), &request)
            .await?;

        debug!(subscription = %subscription, "pubsub_acked");
        Ok(())
    }
}
