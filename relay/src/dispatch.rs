//! Event dispatch: workflow job actions to queue operations.
//!
//! ```text
//! queued      → publish one message        (pool + 1)
//! in_progress → nothing                    (already counted at queued)
//! completed   → pull and ack one message   (pool - 1)
//! other       → nothing, logged
//! ```
//!
//! The pool is a fungible counter held by the queue service. A completed
//! job removes whichever message comes next, not the one its own queued
//! event produced. Duplicate deliveries therefore drift the count; that is
//! accepted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::event::{InboundEvent, JobAction};
use crate::queue::{
    with_deadline, QueueClient, QueueError, QueueMessage, RUN_ID_ATTRIBUTE, RUN_URL_ATTRIBUTE,
};

/// What a dispatched event did to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A message was published.
    Incremented,
    /// A message was pulled and acknowledged.
    Decremented,
    /// A completed job found the subscription empty.
    AlreadyEmpty,
    /// No queue operation for this action.
    NoOp,
    /// Action not recognised; nothing was done.
    Ignored(String),
}

/// Errors from dispatching an event, one per queue-touching branch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to publish message: {0}")]
    Publish(#[source] QueueError),

    #[error("failed to pull and ack: {0}")]
    PullAndAck(#[source] QueueError),
}

/// Maps events to queue operations against one topic and subscription.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn QueueClient>,
    topic: String,
    subscription: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        topic: String,
        subscription: String,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            topic,
            subscription,
            timeout,
        }
    }

    /// Apply the queue operation for `event`.
    pub async fn dispatch(&self, event: &InboundEvent) -> Result<DispatchOutcome, DispatchError> {
        let job = &event.workflow_job;

        match &event.action {
            JobAction::Queued => {
                let message = QueueMessage::with_attributes([
                    (RUN_ID_ATTRIBUTE, job.run_id.as_str()),
                    (RUN_URL_ATTRIBUTE, job.run_url.as_str()),
                ]);

                with_deadline(
                    "publish",
                    self.timeout,
                    self.queue.publish_one(&self.topic, message),
                )
                .await
                .map_err(DispatchError::Publish)?;

                info!(
                    run_id = %job.run_id,
                    repository = %event.repository.full_name,
                    topic = %self.topic,
                    "pool_incremented"
                );
                Ok(DispatchOutcome::Incremented)
            }

            JobAction::InProgress => {
                info!(run_id = %job.run_id, "job_in_progress");
                Ok(DispatchOutcome::NoOp)
            }

            JobAction::Completed => {
                let pulled = with_deadline(
                    "pull_and_ack",
                    self.timeout,
                    self.queue.pull_and_ack(&self.subscription),
                )
                .await
                .map_err(DispatchError::PullAndAck)?;

                match pulled {
                    Some(message) => {
                        info!(
                            run_id = %job.run_id,
                            repository = %event.repository.full_name,
                            released_run_id = message
                                .attributes
                                .get(RUN_ID_ATTRIBUTE)
                                .map(String::as_str)
                                .unwrap_or(""),
                            "pool_decremented"
                        );
                        Ok(DispatchOutcome::Decremented)
                    }
                    None => {
                        info!(
                            run_id = %job.run_id,
                            subscription = %self.subscription,
                            "pool_already_empty"
                        );
                        Ok(DispatchOutcome::AlreadyEmpty)
                    }
                }
            }

            JobAction::Unknown(action) => {
                warn!(action = %action, "unknown_event_action");
                Ok(DispatchOutcome::Ignored(action.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Repository, WorkflowJob};
    use crate::queue::testing::RecordingQueue;
    use crate::queue::{AckHandle, ReceivedMessage};

    const TOPIC: &str = "projects/p/topics/pool";
    const SUBSCRIPTION: &str = "projects/p/subscriptions/pool";

    fn dispatcher(queue: Arc<RecordingQueue>) -> Dispatcher {
        Dispatcher::new(
            queue,
            TOPIC.to_string(),
            SUBSCRIPTION.to_string(),
            Duration::from_secs(2),
        )
    }

    fn event(action: JobAction) -> InboundEvent {
        InboundEvent {
            action,
            workflow_job: WorkflowJob {
                run_id: "123".to_string(),
                run_url: "http://x".to_string(),
            },
            repository: Repository {
                full_name: "acme/widgets".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_queued_publishes_once_with_run_attributes() {
        let queue = Arc::new(RecordingQueue::new());

        let outcome = dispatcher(queue.clone())
            .dispatch(&event(JobAction::Queued))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Incremented);
        let published = queue.published();
        assert_eq!(published.len(), 1);
        let (topic, messages) = &published[0];
        assert_eq!(topic, TOPIC);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].data.is_empty());
        assert_eq!(messages[0].attributes.len(), 2);
        assert_eq!(messages[0].attributes[RUN_ID_ATTRIBUTE], "123");
        assert_eq!(messages[0].attributes[RUN_URL_ATTRIBUTE], "http://x");
        assert_eq!(queue.pull_count(), 0);
    }

    #[tokio::test]
    async fn test_in_progress_touches_no_queue() {
        let queue = Arc::new(RecordingQueue::new());

        let outcome = dispatcher(queue.clone())
            .dispatch(&event(JobAction::InProgress))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::NoOp);
        assert_eq!(queue.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_touches_no_queue() {
        let queue = Arc::new(RecordingQueue::new());

        let outcome = dispatcher(queue.clone())
            .dispatch(&event(JobAction::Unknown("waiting".to_string())))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored("waiting".to_string()));
        assert_eq!(queue.call_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_on_empty_pool_is_not_an_error() {
        let queue = Arc::new(RecordingQueue::new());

        let outcome = dispatcher(queue.clone())
            .dispatch(&event(JobAction::Completed))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::AlreadyEmpty);
        assert_eq!(queue.pull_count(), 1);
        assert!(queue.acked().is_empty());
    }

    #[tokio::test]
    async fn test_completed_acks_any_pending_message() {
        let queue = Arc::new(RecordingQueue::new());
        // Belongs to a different run; the pool is not a per-job ledger
        queue.enqueue(ReceivedMessage {
            ack_handle: AckHandle::new("ack-9"),
            message: QueueMessage::with_attributes([(RUN_ID_ATTRIBUTE, "999")]),
        });

        let outcome = dispatcher(queue.clone())
            .dispatch(&event(JobAction::Completed))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Decremented);
        assert_eq!(
            queue.acked(),
            vec![(SUBSCRIPTION.to_string(), AckHandle::new("ack-9"))]
        );
        assert!(queue.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_surfaced() {
        let queue = Arc::new(RecordingQueue::new().failing_publish());

        let err = dispatcher(queue)
            .dispatch(&event(JobAction::Queued))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Publish(QueueError::Status { .. })));
        assert!(err.to_string().starts_with("failed to publish message:"));
    }

    #[tokio::test]
    async fn test_ack_failure_is_surfaced() {
        let queue = Arc::new(RecordingQueue::new().failing_ack());
        queue.enqueue(ReceivedMessage {
            ack_handle: AckHandle::new("ack-1"),
            message: QueueMessage::default(),
        });

        let err = dispatcher(queue)
            .dispatch(&event(JobAction::Completed))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PullAndAck(_)));
    }

    #[tokio::test]
    async fn test_slow_queue_times_out() {
        let queue = Arc::new(RecordingQueue::new().delayed(Duration::from_secs(5)));
        let dispatcher = Dispatcher::new(
            queue,
            TOPIC.to_string(),
            SUBSCRIPTION.to_string(),
            Duration::from_millis(20),
        );

        let err = dispatcher
            .dispatch(&event(JobAction::Completed))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::PullAndAck(QueueError::Timeout { operation: "pull_and_ack", .. })
        ));
    }
}
