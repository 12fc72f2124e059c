//! RabbitMQ transport for the pool semaphore.
//!
//! Topic and subscription names are queue names on the default exchange.
//! Publish maps to `basic.publish`, pull to `basic.get` with manual ack, and
//! ack to `basic.ack` with the delivery tag carried in the [`AckHandle`].
//! Delivery tags are scoped to the channel, so a reconnect between pull and
//! ack turns the ack into an error and the broker redelivers the message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::{
    options::{BasicAckOptions, BasicGetOptions, BasicPublishOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{AckHandle, QueueClient, QueueError, QueueMessage, ReceivedMessage};

/// RabbitMQ client with lazy connection management.
///
/// The client keeps one connection and channel, shared by all requests, and
/// reconnects when the channel is no longer usable.
#[derive(Clone)]
pub struct AmqpClient {
    inner: Arc<AmqpInner>,
}

struct AmqpInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    declared: RwLock<Vec<String>>,
}

fn amqp_err(operation: &'static str) -> impl FnOnce(lapin::Error) -> QueueError {
    move |source| QueueError::Amqp { operation, source }
}

impl AmqpClient {
    /// Create a new client for the given broker URL. No connection is made yet.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(AmqpInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
                declared: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, QueueError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("amqp_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(amqp_err("connect"))?;

        let ch = conn
            .create_channel()
            .await
            .map_err(amqp_err("create_channel"))?;

        info!("amqp_connected");

        // Queues must be redeclared on a fresh channel.
        self.inner.declared.write().await.clear();

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Declare a durable queue once per channel.
    async fn ensure_queue(&self, channel: &Channel, queue: &str) -> Result<(), QueueError> {
        if self.inner.declared.read().await.iter().any(|q| q == queue) {
            return Ok(());
        }

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(amqp_err("queue_declare"))?;

        info!(queue = %queue, "amqp_queue_declared");
        self.inner.declared.write().await.push(queue.to_string());

        Ok(())
    }
}

/// Convert message attributes to AMQP headers.
fn attributes_to_headers(attributes: &HashMap<String, String>) -> FieldTable {
    let mut headers = FieldTable::default();
    for (key, value) in attributes {
        headers.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }
    headers
}

/// Convert AMQP headers back to attributes, skipping non-string values.
fn headers_to_attributes(headers: Option<&FieldTable>) -> HashMap<String, String> {
    let Some(headers) = headers else {
        return HashMap::new();
    };

    headers
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::ShortString(s) => s.as_str().to_string(),
                _ => return None,
            };
            Some((key.as_str().to_string(), value))
        })
        .collect()
}

#[async_trait]
impl QueueClient for AmqpClient {
    async fn publish(&self, topic: &str, messages: &[QueueMessage]) -> Result<(), QueueError> {
        let channel = self.ensure_connected().await?;
        self.ensure_queue(&channel, topic).await?;

        for message in messages {
            let properties = BasicProperties::default()
                .with_delivery_mode(2) // Persistent
                .with_timestamp(Utc::now().timestamp().max(0) as u64)
                .with_headers(attributes_to_headers(&message.attributes));

            channel
                .basic_publish(
                    "",
                    topic,
                    BasicPublishOptions::default(),
                    &message.data,
                    properties,
                )
                .await
                .map_err(amqp_err("publish"))?
                .await
                .map_err(amqp_err("publish_confirm"))?;
        }

        debug!(queue = %topic, count = messages.len(), "amqp_published");
        Ok(())
    }

    async fn pull(&self, subscription: &str) -> Result<Option<ReceivedMessage>, QueueError> {
        let channel = self.ensure_connected().await?;
        self.ensure_queue(&channel, subscription).await?;

        let Some(got) = channel
            .basic_get(subscription, BasicGetOptions { no_ack: false })
            .await
            .map_err(amqp_err("pull"))?
        else {
            debug!(queue = %subscription, "amqp_pull_empty");
            return Ok(None);
        };

        let delivery = got.delivery;
        let properties = &delivery.properties;

        let message = QueueMessage {
            attributes: headers_to_attributes(properties.headers().as_ref()),
            message_id: properties.message_id().as_ref().map(|id| id.to_string()),
            publish_time: properties
                .timestamp()
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0)),
            data: delivery.data.clone(),
        };

        Ok(Some(ReceivedMessage {
            ack_handle: AckHandle::new(delivery.delivery_tag.to_string()),
            message,
        }))
    }

    async fn ack(&self, subscription: &str, handle: &AckHandle) -> Result<(), QueueError> {
        let delivery_tag: u64 = handle
            .as_str()
            .parse()
            .map_err(|_| QueueError::InvalidAckHandle("not an AMQP delivery tag".to_string()))?;

        let channel = self.ensure_connected().await?;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(amqp_err("ack"))?;

        debug!(queue = %subscription, delivery_tag = delivery_tag, "amqp_acked");
        Ok(())
    }

    /// Close the connection gracefully.
    async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_connection_close_error");
            }
        }

        info!("amqp_client_closed");
    }
}
