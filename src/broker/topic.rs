//! # Topic: one event in, one independent message per subscriber out.
//!
//! ```text
//! publish(event)
//!     │            (Message::new(event.clone()) per subscriber, concurrently)
//!     ├──► deliver(Q1) ── enqueue ─┬─ Ok ─────────────► delivered
//!     │                            └─ Err ─► backoff ─► retry (≤ attempts)
//!     ├──► deliver(Q2) ...
//!     └──► deliver(QN) ...
//!                 │
//!      all Ok ────┴──► Ok(PublishReport)
//!      any Err ──────► Err(PublishPartialFailure { delivered, failed })
//! ```
//!
//! ## Rules
//! - The subscriber set is fixed at construction.
//! - A failing subscriber never blocks or cancels deliveries to the others;
//!   each delivery retries on its own schedule.
//! - Retries re-send the same message id, so a backend that deduplicates by id
//!   never sees a retried copy twice.
//! - No ordering between subscribers.

use std::sync::Arc;

use futures::future::join_all;
use tokio::time;
use tracing::{debug, warn};

use crate::broker::message::{Message, MessageId, ObjectEvent};
use crate::broker::queue::QueueRef;
use crate::error::{DeliveryFailure, PipelineError, QueueError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::RetryPolicy;

/// Successful fan-out: one message id per subscriber, in subscriber order.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub deliveries: Vec<(String, MessageId)>,
}

impl PublishReport {
    /// Number of subscribers that accepted the event.
    pub fn delivered(&self) -> usize {
        self.deliveries.len()
    }
}

/// Broadcast channel over a fixed set of subscriber queues.
pub struct Topic {
    name: Arc<str>,
    subscribers: Vec<QueueRef>,
    retry: RetryPolicy,
    bus: Bus,
}

impl Topic {
    /// Creates a topic with the default retry policy and a private bus.
    pub fn new(name: impl Into<Arc<str>>, subscribers: Vec<QueueRef>) -> Self {
        Self {
            name: name.into(),
            subscribers,
            retry: RetryPolicy::default(),
            bus: Bus::default(),
        }
    }

    /// Overrides the per-subscriber retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publishes failure events on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscriber queues in registration order.
    pub fn subscribers(&self) -> &[QueueRef] {
        &self.subscribers
    }

    /// Delivers an independent copy of `event` to every subscriber.
    ///
    /// Returns [`PipelineError::PublishPartialFailure`] if at least one
    /// subscriber could not be reached after its retries; the subscribers that
    /// accepted the event keep their copy.
    pub async fn publish(&self, event: ObjectEvent) -> Result<PublishReport, PipelineError> {
        let deliveries = self
            .subscribers
            .iter()
            .map(|queue| self.deliver(queue, Message::new(event.clone())));
        let results = join_all(deliveries).await;

        let mut delivered = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for res in results {
            match res {
                Ok(ok) => delivered.push(ok),
                Err(failure) => {
                    warn!(
                        topic = %self.name,
                        queue = %failure.queue,
                        attempts = failure.attempts,
                        error = %failure.error,
                        key = %event.key,
                        "subscriber delivery failed"
                    );
                    self.bus.publish(
                        Event::new(EventKind::PublishFailed)
                            .with_topic(Arc::clone(&self.name))
                            .with_queue(failure.queue.as_str())
                            .with_attempt(failure.attempts)
                            .with_reason(failure.error.to_string()),
                    );
                    failed.push(failure);
                }
            }
        }

        if failed.is_empty() {
            debug!(
                topic = %self.name,
                key = %event.key,
                subscribers = delivered.len(),
                "published"
            );
            Ok(PublishReport {
                deliveries: delivered,
            })
        } else {
            Err(PipelineError::PublishPartialFailure {
                topic: self.name.to_string(),
                delivered: delivered.len(),
                failed,
            })
        }
    }

    /// Enqueues one message, retrying per policy.
    async fn deliver(
        &self,
        queue: &QueueRef,
        message: Message,
    ) -> Result<(String, MessageId), DeliveryFailure> {
        let id = message.id;
        let attempts = self.retry.attempts_clamped();
        let mut last_error = QueueError::Closed;

        for attempt in 0..attempts {
            if attempt > 0 {
                time::sleep(self.retry.backoff.next(attempt - 1)).await;
            }
            match queue.enqueue(message.clone()).await {
                Ok(()) => return Ok((queue.name().to_string(), id)),
                Err(e) => {
                    debug!(
                        topic = %self.name,
                        queue = queue.name(),
                        attempt,
                        error = %e,
                        "enqueue failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(DeliveryFailure {
            queue: queue.name().to_string(),
            attempts,
            error: last_error,
        })
    }
}
