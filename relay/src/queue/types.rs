//! Message types shared by every queue transport.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Attribute carrying the workflow run id of a queued job.
pub const RUN_ID_ATTRIBUTE: &str = "run_id";

/// Attribute carrying the workflow run URL of a queued job.
pub const RUN_URL_ATTRIBUTE: &str = "run_url";

/// A message on a topic or subscription.
///
/// For the pool semaphore the payload is empty and the attributes are
/// metadata only; what counts is how many unacknowledged messages exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMessage {
    /// Message payload, may be empty.
    pub data: Vec<u8>,

    /// Message attributes.
    pub attributes: HashMap<String, String>,

    /// Assigned by the queue service on publish.
    pub message_id: Option<String>,

    /// Server timestamp for when the message was published.
    pub publish_time: Option<DateTime<Utc>>,
}

impl QueueMessage {
    /// Build an empty-payload message carrying only attributes.
    pub fn with_attributes<I, K, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Default::default()
        }
    }
}

/// Opaque token needed to acknowledge a pulled message.
///
/// Only meaningful to the transport and subscription that produced it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AckHandle(String);

impl AckHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Ack ids are bearer-like tokens; only print their length.
impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckHandle(len={})", self.0.len())
    }
}

/// A pulled message together with the handle that acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_handle: AckHandle,
    pub message: QueueMessage,
}
