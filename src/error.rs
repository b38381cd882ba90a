//! Error types used by the fanvisor runtime, its queues and its handlers.
//!
//! - [`PipelineError`]: the pipeline-level taxonomy (publish, handling, redelivery, queue availability).
//! - [`QueueError`]: failures of a [`Queue`](crate::Queue) backend.
//! - [`HandlerError`]: per-message failures reported by handlers.
//! - [`StoreError`], [`NotifyError`]: failures of external collaborators.
//! - [`RuntimeError`]: failures of the runtime lifecycle itself (shutdown).
//!
//! Every enum exposes `as_label()`, a short stable snake_case label for logs/metrics.

use std::time::Duration;
use thiserror::Error;

use crate::broker::MessageId;

/// One subscriber delivery that could not be completed during a topic publish.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Name of the subscriber queue.
    pub queue: String,
    /// Number of enqueue attempts made.
    pub attempts: u32,
    /// Last error returned by the queue.
    pub error: QueueError,
}

/// # Errors produced by the pipeline.
///
/// Failures are scoped to the smallest unit possible: one subscriber delivery,
/// one message or one poll cycle. None of them aborts sibling work.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PipelineError {
    /// One or more subscriber enqueues failed during fan-out (after retries).
    #[error("publish to topic '{topic}' partially failed: {} of {} deliveries failed", .failed.len(), .failed.len() + .delivered)]
    PublishPartialFailure {
        /// Topic name.
        topic: String,
        /// Number of subscribers that accepted the event.
        delivered: usize,
        /// Subscribers that did not.
        failed: Vec<DeliveryFailure>,
    },

    /// A single message failed in its handler; left for redelivery.
    #[error("message {message} failed in queue '{queue}': {error}")]
    HandlerFailure {
        queue: String,
        message: MessageId,
        error: HandlerError,
    },

    /// A message exceeded the receive threshold and was dead-lettered.
    #[error("message {message} in queue '{queue}' dead-lettered after {receive_count} receives")]
    MaxRedeliveryExceeded {
        queue: String,
        message: MessageId,
        receive_count: u32,
    },

    /// Batch processing exceeded its deadline.
    #[error("batch in queue '{queue}' timed out after {timeout:?}; {pending} message(s) pending")]
    HandlerTimeout {
        queue: String,
        timeout: Duration,
        pending: usize,
    },

    /// The queue could not accept or return messages.
    #[error("queue '{queue}' unavailable: {error}")]
    QueueUnavailable { queue: String, error: QueueError },

    /// Configuration rejected at build time.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl PipelineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fanvisor::PipelineError;
    ///
    /// let err = PipelineError::InvalidConfig { reason: "batch_size = 0".into() };
    /// assert_eq!(err.as_label(), "invalid_config");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            PipelineError::PublishPartialFailure { .. } => "publish_partial_failure",
            PipelineError::HandlerFailure { .. } => "handler_failure",
            PipelineError::MaxRedeliveryExceeded { .. } => "max_redelivery_exceeded",
            PipelineError::HandlerTimeout { .. } => "handler_timeout",
            PipelineError::QueueUnavailable { .. } => "queue_unavailable",
            PipelineError::InvalidConfig { .. } => "invalid_config",
        }
    }
}

/// # Errors produced by queue backends.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed and accepts no more traffic.
    #[error("queue closed")]
    Closed,

    /// The backend is temporarily unreachable.
    #[error("queue unavailable: {reason}")]
    Unavailable { reason: String },
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Closed => "queue_closed",
            QueueError::Unavailable { .. } => "queue_unavailable",
        }
    }
}

/// # Errors produced while handling a single message.
///
/// Any of these leaves the message un-acknowledged so the queue redelivers it.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Generic handler failure.
    #[error("handler failed: {error}")]
    Failed { error: String },

    /// The batch deadline elapsed before this message finished.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The handler panicked.
    #[error("handler panicked: {info}")]
    Panicked { info: String },

    /// The referenced object does not exist.
    #[error("object '{key}' not found")]
    ObjectMissing { key: String },

    /// The object is not in a supported format.
    #[error("unsupported format for '{key}': {detail}")]
    UnsupportedFormat { key: String, detail: String },

    /// The transform step failed.
    #[error("transform of '{key}' failed: {error}")]
    Transform { key: String, error: String },

    /// Writing the output object failed.
    #[error("write of '{key}' failed: {error}")]
    Write { key: String, error: String },

    /// The event payload cannot be processed.
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },

    /// The notification provider rejected the delivery.
    #[error("delivery rejected: {reason}")]
    Rejected { reason: String },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        HandlerError::Failed {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fanvisor::HandlerError;
    /// use std::time::Duration;
    ///
    /// let err = HandlerError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "handler_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Failed { .. } => "handler_failed",
            HandlerError::Timeout { .. } => "handler_timeout",
            HandlerError::Panicked { .. } => "handler_panicked",
            HandlerError::ObjectMissing { .. } => "object_missing",
            HandlerError::UnsupportedFormat { .. } => "unsupported_format",
            HandlerError::Transform { .. } => "transform_failed",
            HandlerError::Write { .. } => "write_failed",
            HandlerError::MalformedPayload { .. } => "malformed_payload",
            HandlerError::Rejected { .. } => "delivery_rejected",
        }
    }

    /// Indicates whether redelivery can plausibly succeed.
    ///
    /// Payload and format problems are deterministic and will fail again. The
    /// message still goes back to the queue; the dispatcher copies this flag
    /// into `Event::retryable` of the `MessageFailed` event, and `LogWriter`
    /// logs non-retryable failures at `warn`.
    ///
    /// # Example
    /// ```
    /// use fanvisor::HandlerError;
    ///
    /// assert!(HandlerError::failed("flaky").is_retryable());
    /// assert!(!HandlerError::MalformedPayload { reason: "empty key".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            HandlerError::UnsupportedFormat { .. } | HandlerError::MalformedPayload { .. }
        )
    }
}

/// # Errors produced by an [`ObjectStore`](crate::ObjectStore).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object '{key}' not found")]
    NotFound { key: String },

    #[error("store i/o error on '{key}': {reason}")]
    Io { key: String, reason: String },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "store_not_found",
            StoreError::Io { .. } => "store_io",
        }
    }
}

/// # Errors produced by a [`Notifier`](crate::Notifier).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The provider refused the message.
    #[error("provider rejected message to '{recipient}': {reason}")]
    Rejected { recipient: String, reason: String },

    /// The provider could not be reached.
    #[error("provider unavailable: {reason}")]
    Unavailable { reason: String },
}

impl NotifyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            NotifyError::Rejected { .. } => "notify_rejected",
            NotifyError::Unavailable { .. } => "notify_unavailable",
        }
    }
}

/// # Errors produced by the fanvisor runtime lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; remaining dispatchers were abandoned.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Queues whose dispatcher did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fanvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
