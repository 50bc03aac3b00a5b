//! Consume loop: pulls one message at a time and drives the dispatch kernel.
//!
//! # States
//!
//! ```text
//! Idle ─declare─▶ Fetching ─message─▶ Processing ─ok──────▶ Acknowledging ─▶ Fetching
//!   ▲                │  │                  └─reject─▶ Rejecting ─▶ Fetching | Backoff
//!   └── Backoff ◀────┘  └─empty / transport error─▶ Backoff ─▶ Fetching
//! ```
//!
//! `Stopped` is reached on shutdown or on a transport error that cannot
//! recover ([`TransportError::is_recoverable`]). Every other transport error
//! is logged and retried after the fixed backoff interval; there is no retry
//! counter and no exponential growth.
//!
//! A message is only acknowledged after its dispatch succeeded. Undecodable
//! bodies and unknown handlers are rejected per [`RejectPolicy`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, RejectPolicy};
use crate::error::AppError;
use crate::kernel::{InvocationResult, Message, Registry, dispatch};
use crate::transport::{Delivery, QueueSpec, QueueTransport, TransportError};

const BODY_PREVIEW_CHARS: usize = 256;

/// Where to go once a backoff wait ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Declare,
    Fetch,
}

/// Why the loop is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffReason {
    Empty,
    Transport,
    Requeued,
}

#[derive(Debug)]
pub enum State {
    Idle,
    Fetching,
    Processing(Delivery),
    Acknowledging { tag: u64, results: Vec<InvocationResult> },
    Rejecting { tag: u64 },
    Backoff { reason: BackoffReason, resume: Resume },
    Stopped,
}

/// Counters kept for the lifetime of one [`Consumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub fetched: u64,
    pub acked: u64,
    pub rejected: u64,
    pub empty_polls: u64,
    pub transport_errors: u64,
}

pub struct Consumer {
    transport: Arc<dyn QueueTransport>,
    registry: Arc<Registry>,
    queue: QueueSpec,
    backoff: Duration,
    reject: RejectPolicy,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        registry: Arc<Registry>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            queue: QueueSpec {
                name: config.name.clone(),
                durable: config.durable,
                dead_letter: config.reject == RejectPolicy::DeadLetter,
            },
            backoff: config.backoff,
            reject: config.reject,
            stats: ConsumerStats::default(),
        }
    }

    /// Run until `shutdown` is cancelled or the transport closes for good.
    ///
    /// A message already being dispatched is finished (acked or rejected)
    /// before shutdown is observed.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ConsumerStats, AppError> {
        info!(
            queue = %self.queue.name,
            backoff_secs = self.backoff.as_secs(),
            reject = ?self.reject,
            plugins = ?self.registry.names(),
            "consumer starting"
        );

        let mut state = State::Idle;
        loop {
            if shutdown.is_cancelled() && matches!(state, State::Idle | State::Fetching) {
                state = State::Stopped;
            }
            if let State::Stopped = state {
                break;
            }
            state = match self.step(state, &shutdown).await {
                Ok(next) => next,
                Err(e) => {
                    error!(queue = %self.queue.name, "transport unusable, stopping: {e}");
                    return Err(e.into());
                }
            };
        }

        info!(stats = ?self.stats, "consumer stopped");
        Ok(self.stats)
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Advance one transition. `Err` only for unrecoverable transport errors.
    pub async fn step(
        &mut self,
        state: State,
        shutdown: &CancellationToken,
    ) -> Result<State, TransportError> {
        let next = match state {
            State::Idle => match self.transport.declare_queue(&self.queue).await {
                Ok(()) => {
                    info!(queue = %self.queue.name, durable = self.queue.durable, "queue ready");
                    State::Fetching
                }
                Err(e) => self.transport_failed(e, Resume::Declare)?,
            },

            State::Fetching => match self.transport.fetch_one(&self.queue.name).await {
                Ok(Some(delivery)) => {
                    self.stats.fetched += 1;
                    State::Processing(delivery)
                }
                Ok(None) => {
                    self.stats.empty_polls += 1;
                    State::Backoff { reason: BackoffReason::Empty, resume: Resume::Fetch }
                }
                Err(e) => self.transport_failed(e, Resume::Fetch)?,
            },

            State::Processing(delivery) => {
                let span = info_span!(
                    "delivery",
                    id = %Uuid::new_v4(),
                    tag = delivery.tag,
                    redelivered = delivery.redelivered
                );
                self.process(delivery).instrument(span).await
            }

            State::Acknowledging { tag, results } => match self.transport.ack(tag).await {
                Ok(()) => {
                    self.stats.acked += 1;
                    let results = Value::Array(results.iter().map(InvocationResult::to_json).collect());
                    info!(tag, results = %results, "message acknowledged");
                    State::Fetching
                }
                Err(e) => self.transport_failed(e, Resume::Fetch)?,
            },

            State::Rejecting { tag } => {
                let requeue = self.reject.requeues();
                match self.transport.nack(tag, requeue).await {
                    Ok(()) => {
                        self.stats.rejected += 1;
                        if requeue {
                            State::Backoff { reason: BackoffReason::Requeued, resume: Resume::Fetch }
                        } else {
                            State::Fetching
                        }
                    }
                    Err(e) => self.transport_failed(e, Resume::Fetch)?,
                }
            }

            State::Backoff { reason, resume } => {
                match reason {
                    BackoffReason::Empty => {
                        debug!(secs = self.backoff.as_secs(), "no messages, sleeping")
                    }
                    BackoffReason::Transport | BackoffReason::Requeued => {
                        info!(secs = self.backoff.as_secs(), ?reason, "backing off")
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => State::Stopped,
                    _ = tokio::time::sleep(self.backoff) => match resume {
                        Resume::Declare => State::Idle,
                        Resume::Fetch => State::Fetching,
                    },
                }
            }

            State::Stopped => State::Stopped,
        };
        Ok(next)
    }

    async fn process(&mut self, delivery: Delivery) -> State {
        let tag = delivery.tag;

        let message = match Message::decode(&delivery.body) {
            Ok(m) => m,
            Err(e) => {
                warn!(body = %preview(&delivery.body), "undecodable message: {e}");
                return State::Rejecting { tag };
            }
        };

        debug!(entries = message.len(), "dispatching");
        match dispatch(message, &self.registry).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| !r.is_ok()).count();
                if failed > 0 {
                    warn!(failed, total = results.len(), "some plugins reported failures");
                }
                State::Acknowledging { tag, results }
            }
            Err(e) => {
                warn!(body = %preview(&delivery.body), "dispatch rejected: {e}");
                State::Rejecting { tag }
            }
        }
    }

    fn transport_failed(&mut self, e: TransportError, resume: Resume) -> Result<State, TransportError> {
        if !e.is_recoverable() {
            return Err(e);
        }
        self.stats.transport_errors += 1;
        warn!(queue = %self.queue.name, "transport error: {e}");
        Ok(State::Backoff { reason: BackoffReason::Transport, resume })
    }
}

fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.into_owned(),
    }
}
