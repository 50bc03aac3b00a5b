//! In-memory queue transport.
//!
//! Behaves like a broker channel with manual ack: fetched messages sit in an
//! unacked set until acked or nacked, `nack(requeue = true)` puts them back
//! at the head flagged as redelivered, and `nack(requeue = false)` moves them
//! to the dead-letter queue when one was declared.
//!
//! Cloning yields another handle to the same queues, so a test can keep one
//! clone for publishing and inspection while the consumer owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Delivery, QueueSpec, QueueTransport, TransportError};

#[derive(Debug, Clone)]
struct Stored {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<Stored>,
    dead_letter: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, Queue>,
    unacked: HashMap<u64, (String, Stored)>,
    next_tag: u64,
    acked: u64,
    fetch_failures: VecDeque<String>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, creating the queue if needed.
    pub async fn publish(&self, queue: &str, body: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(Stored { body: body.into(), redelivered: false });
    }

    /// Make the next `fetch_one` fail with a recoverable error.
    pub async fn fail_next_fetch(&self, reason: impl Into<String>) {
        self.state.lock().await.fetch_failures.push_back(reason.into());
    }

    /// Every later operation returns [`TransportError::Closed`].
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Messages waiting to be fetched.
    pub async fn ready_len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    /// Fetched but neither acked nor nacked.
    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    pub async fn acked_count(&self) -> u64 {
        self.state.lock().await.acked
    }

    /// Bodies sitting in `queue`'s dead-letter queue.
    pub async fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        let Some(dlq) = state.queues.get(queue).and_then(|q| q.dead_letter.as_ref()) else {
            return Vec::new();
        };
        state
            .queues
            .get(dlq)
            .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if spec.dead_letter {
            state.queues.entry(spec.dead_letter_queue()).or_default();
        }
        let queue = state.queues.entry(spec.name.clone()).or_default();
        if spec.dead_letter {
            queue.dead_letter = Some(spec.dead_letter_queue());
        }
        Ok(())
    }

    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>, TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if let Some(reason) = state.fetch_failures.pop_front() {
            return Err(TransportError::Fetch { queue: queue.to_string(), reason });
        }

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(TransportError::Fetch {
                queue: queue.to_string(),
                reason: "queue not declared".into(),
            });
        };
        let Some(stored) = q.ready.pop_front() else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery {
            tag,
            body: stored.body.clone(),
            redelivered: stored.redelivered,
        };
        state.unacked.insert(tag, (queue.to_string(), stored));
        Ok(Some(delivery))
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.unacked.remove(&tag).is_none() {
            return Err(TransportError::Ack { tag, reason: "unknown delivery tag".into() });
        }
        state.acked += 1;
        Ok(())
    }

    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }
        let Some((queue, mut stored)) = state.unacked.remove(&tag) else {
            return Err(TransportError::Nack { tag, reason: "unknown delivery tag".into() });
        };

        if requeue {
            stored.redelivered = true;
            state.queues.entry(queue).or_default().ready.push_front(stored);
            return Ok(());
        }

        let dead_letter = state.queues.get(&queue).and_then(|q| q.dead_letter.clone());
        if let Some(dlq) = dead_letter {
            state.queues.entry(dlq).or_default().ready.push_back(stored);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dead_letter: bool) -> QueueSpec {
        QueueSpec { name: "work".into(), durable: true, dead_letter }
    }

    #[tokio::test]
    async fn fetch_then_ack_removes_message() {
        let t = InMemoryTransport::new();
        t.declare_queue(&spec(false)).await.unwrap();
        t.publish("work", "hello").await;

        let d = t.fetch_one("work").await.unwrap().expect("one message");
        assert_eq!(d.body, b"hello");
        assert!(!d.redelivered);
        assert_eq!(t.unacked_len().await, 1);

        t.ack(d.tag).await.unwrap();
        assert_eq!(t.unacked_len().await, 0);
        assert_eq!(t.acked_count().await, 1);
        assert!(t.fetch_one("work").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_redelivers_at_head() {
        let t = InMemoryTransport::new();
        t.declare_queue(&spec(false)).await.unwrap();
        t.publish("work", "first").await;
        t.publish("work", "second").await;

        let d = t.fetch_one("work").await.unwrap().unwrap();
        t.nack(d.tag, true).await.unwrap();

        let again = t.fetch_one("work").await.unwrap().unwrap();
        assert_eq!(again.body, b"first");
        assert!(again.redelivered);
        assert_ne!(again.tag, d.tag);
    }

    #[tokio::test]
    async fn reject_goes_to_dead_letter_queue() {
        let t = InMemoryTransport::new();
        t.declare_queue(&spec(true)).await.unwrap();
        t.publish("work", "poison").await;

        let d = t.fetch_one("work").await.unwrap().unwrap();
        t.nack(d.tag, false).await.unwrap();

        assert_eq!(t.ready_len("work").await, 0);
        assert_eq!(t.dead_letters("work").await, vec![b"poison".to_vec()]);
    }

    #[tokio::test]
    async fn undeclared_queue_is_a_fetch_error() {
        let t = InMemoryTransport::new();
        let err = t.fetch_one("nowhere").await.unwrap_err();
        assert!(matches!(err, TransportError::Fetch { .. }));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let t = InMemoryTransport::new();
        t.declare_queue(&spec(false)).await.unwrap();
        t.fail_next_fetch("connection reset").await;

        assert!(t.fetch_one("work").await.unwrap_err().is_recoverable());
        assert!(t.fetch_one("work").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_transport_refuses_everything() {
        let t = InMemoryTransport::new();
        t.close().await;
        assert_eq!(t.fetch_one("work").await, Err(TransportError::Closed));
        assert_eq!(t.ack(1).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn unknown_tag_cannot_be_acked() {
        let t = InMemoryTransport::new();
        assert!(matches!(t.ack(99).await, Err(TransportError::Ack { tag: 99, .. })));
    }
}
