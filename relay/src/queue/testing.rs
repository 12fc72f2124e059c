//! Recording queue client for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{AckHandle, QueueClient, QueueError, QueueMessage, ReceivedMessage};

/// In-process `QueueClient` that records every call.
#[derive(Default)]
pub(crate) struct RecordingQueue {
    pending: Mutex<VecDeque<ReceivedMessage>>,
    published: Mutex<Vec<(String, Vec<QueueMessage>)>>,
    acked: Mutex<Vec<(String, AckHandle)>>,
    pulls: AtomicUsize,
    fail_publish: bool,
    fail_pull: bool,
    fail_ack: bool,
    delay: Option<Duration>,
}

impl RecordingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_publish(mut self) -> Self {
        self.fail_publish = true;
        self
    }

    pub(crate) fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub(crate) fn failing_ack(mut self) -> Self {
        self.fail_ack = true;
        self
    }

    /// Make every operation sleep before answering.
    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn enqueue(&self, message: ReceivedMessage) {
        self.pending.lock().unwrap().push_back(message);
    }

    pub(crate) fn published(&self) -> Vec<(String, Vec<QueueMessage>)> {
        self.published.lock().unwrap().clone()
    }

    pub(crate) fn acked(&self) -> Vec<(String, AckHandle)> {
        self.acked.lock().unwrap().clone()
    }

    pub(crate) fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Total number of calls of any kind.
    pub(crate) fn call_count(&self) -> usize {
        self.published.lock().unwrap().len() + self.acked.lock().unwrap().len() + self.pull_count()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn injected(operation: &'static str) -> QueueError {
        QueueError::Status {
            operation,
            status: 503,
            body: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl QueueClient for RecordingQueue {
    async fn publish(&self, topic: &str, messages: &[QueueMessage]) -> Result<(), QueueError> {
        self.pause().await;
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), messages.to_vec()));
        if self.fail_publish {
            return Err(Self::injected("publish"));
        }
        Ok(())
    }

    async fn pull(&self, _subscription: &str) -> Result<Option<ReceivedMessage>, QueueError> {
        self.pause().await;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pull {
            return Err(Self::injected("pull"));
        }
        Ok(self.pending.lock().unwrap().pop_front())
    }

    async fn ack(&self, subscription: &str, handle: &AckHandle) -> Result<(), QueueError> {
        self.pause().await;
        self.acked
            .lock()
            .unwrap()
            .push((subscription.to_string(), handle.clone()));
        if self.fail_ack {
            return Err(Self::injected("ack"));
        }
        Ok(())
    }
}
