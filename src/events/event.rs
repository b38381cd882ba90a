//! # Runtime events emitted by the topic, dispatchers and pipeline.
//!
//! [`EventKind`] classifies events in four groups:
//! - **Fan-out**: publish failures per subscriber
//! - **Dispatch**: dispatcher lifecycle, batches, per-message outcomes, timeouts
//! - **Redelivery**: dead letters, unavailable queues, poll backoff
//! - **Shutdown / observers**: drain progress, observer overflow and panics
//!
//! Each [`Event`] carries a globally monotonic `seq` to restore order when
//! observers receive events out of order.
//!
//! ## Example
//! ```rust
//! use fanvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::MessageFailed)
//!     .with_queue("img-backup-queue")
//!     .with_receive_count(2)
//!     .with_reason("destination write failure");
//!
//! assert_eq!(ev.kind, EventKind::MessageFailed);
//! assert_eq!(ev.queue.as_deref(), Some("img-backup-queue"));
//! assert_eq!(ev.receive_count, Some(2));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::broker::MessageId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Fan-out ===
    /// A subscriber delivery failed after all retries.
    ///
    /// Sets: `queue`, `topic`, `reason`, `attempt`.
    PublishFailed,

    // === Dispatch ===
    /// Dispatcher entered its poll loop.
    ///
    /// Sets: `queue`.
    DispatcherStarted,

    /// Dispatcher reached its terminal state.
    ///
    /// Sets: `queue`.
    DispatcherStopped,

    /// A batch closed (full or window elapsed) and goes to the handler.
    ///
    /// Sets: `queue`, `batch_size`.
    BatchReceived,

    /// A batch finished; successes were acknowledged.
    ///
    /// Sets: `queue`, `batch_size`, `acked`.
    BatchProcessed,

    /// A message was acknowledged.
    ///
    /// Sets: `queue`, `message`, `receive_count`.
    MessageAcked,

    /// A message failed and was left for redelivery.
    ///
    /// Sets: `queue`, `message`, `receive_count`, `reason`, `retryable`.
    MessageFailed,

    /// Batch processing hit its deadline.
    ///
    /// Sets: `queue`, `timeout_ms`, `batch_size` (pending messages).
    HandlerTimeout,

    // === Redelivery ===
    /// A message exceeded the receive limit and was dead-lettered.
    ///
    /// Sets: `queue`, `message`, `receive_count`, `reason` (object key).
    MessageDeadLettered,

    /// A receive failed; the cycle is abandoned.
    ///
    /// Sets: `queue`, `reason`, `attempt` (consecutive failures).
    QueueUnavailable,

    /// Acknowledging a successful message failed; it will be redelivered.
    ///
    /// Sets: `queue`, `message`, `reason`.
    AckFailed,

    /// Next poll delayed after a failure.
    ///
    /// Sets: `queue`, `delay_ms`, `attempt`.
    BackoffScheduled,

    // === Shutdown ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All dispatchers drained within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; remaining dispatchers were abandoned.
    ///
    /// Sets: `reason` (stuck queues).
    GraceExceeded,

    // === Observers ===
    /// Observer panicked while handling an event.
    ///
    /// Sets: `queue` (observer name), `reason`.
    SubscriberPanicked,

    /// Observer queue full or closed; event dropped for it.
    ///
    /// Sets: `queue` (observer name), `reason`.
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Queue (or observer) name.
    pub queue: Option<Arc<str>>,
    /// Topic name.
    pub topic: Option<Arc<str>>,
    /// Message concerned.
    pub message: Option<MessageId>,
    /// Receive count of that message.
    pub receive_count: Option<u32>,
    /// Messages in the batch (or pending on timeout).
    pub batch_size: Option<u32>,
    /// Messages acknowledged out of the batch.
    pub acked: Option<u32>,
    /// Attempt / consecutive failure count.
    pub attempt: Option<u32>,
    /// Delay before the next poll in milliseconds.
    pub delay_ms: Option<u32>,
    /// Batch timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Whether redelivery of a failed message can plausibly succeed.
    pub retryable: Option<bool>,
}

impl Event {
    /// Creates a new event with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            queue: None,
            topic: None,
            message: None,
            receive_count: None,
            batch_size: None,
            acked: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
            retryable: None,
        }
    }

    #[inline]
    pub fn with_queue(mut self, queue: impl Into<Arc<str>>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[inline]
    pub fn with_message(mut self, id: MessageId) -> Self {
        self.message = Some(id);
        self
    }

    #[inline]
    pub fn with_receive_count(mut self, n: u32) -> Self {
        self.receive_count = Some(n);
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    #[inline]
    pub fn with_acked(mut self, n: usize) -> Self {
        self.acked = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Creates an observer overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_queue(subscriber)
            .with_reason(reason)
    }

    /// Creates an observer panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_queue(subscriber)
            .with_reason(info)
    }

    /// True for events emitted by the observer machinery itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
