//! Queue transport: the durable work queue the consume loop pulls from.
//!
//! The kernel only needs four operations: declare a queue, fetch at most one
//! message without auto-ack, ack it, or nack it. Anything that offers a
//! durable work queue with manual acknowledgement can sit behind
//! [`QueueTransport`].
//!
//! - [`memory::InMemoryTransport`]: process-local queue for tests and
//!   embedding.
//! - [`amqp::AmqpTransport`]: RabbitMQ via `lapin` (feature `amqp`).

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("declare {queue} failed: {reason}")]
    Declare { queue: String, reason: String },

    #[error("fetch from {queue} failed: {reason}")]
    Fetch { queue: String, reason: String },

    #[error("ack {tag} failed: {reason}")]
    Ack { tag: u64, reason: String },

    #[error("nack {tag} failed: {reason}")]
    Nack { tag: u64, reason: String },

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether waiting and retrying can help. A closed transport never
    /// comes back.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

/// Queue declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Route rejected messages to `<name>_dlq` through `<name>_dlx`.
    pub dead_letter: bool,
}

impl QueueSpec {
    pub fn dead_letter_exchange(&self) -> String {
        format!("{}_dlx", self.name)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}_dlq", self.name)
    }
}

/// One fetched, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Idempotent.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError>;

    /// Non-blocking: `Ok(None)` when the queue is empty.
    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&self, tag: u64) -> Result<(), TransportError>;

    /// `requeue = false` dead-letters the message if the queue was declared
    /// with a dead-letter route, and drops it otherwise.
    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), TransportError>;
}
