//! Workflow job relay - queue-backed worker pool sizing from CI webhooks.
//!
//! Each `workflow_job` webhook adjusts a counting semaphore held in a message
//! queue: a queued job publishes one message, a completed job pulls and
//! acknowledges one. An external autoscaler reads the subscription depth to
//! size the worker pool.
//!
//! ## Architecture
//!
//! ```text
//! Webhook → signature check → decode → Dispatcher → QueueClient (Pub/Sub | AMQP)
//! ```

pub mod config;
pub mod dispatch;
pub mod event;
pub mod queue;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, QueueBackend};
pub use dispatch::{DispatchError, DispatchOutcome, Dispatcher};
pub use event::{InboundEvent, JobAction};
pub use queue::{AckHandle, QueueClient, QueueError, QueueMessage, ReceivedMessage};
pub use web::AppState;
