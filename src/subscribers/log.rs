//! # LogWriter: runtime events as `tracing` records
//!
//! Dead letters, publish failures, timeouts, unavailable queues and
//! non-retryable handler failures are logged at `warn`. Grace overruns go to
//! `error`, everything else to `debug`/`info`.
//!
//! ```text
//! WARN fanvisor: message dead-lettered queue="img-created-queue" message=0190.. receive_count=3 key="cat.png"
//! WARN fanvisor: subscriber delivery failed topic="new-image" queue="img-backup-queue" attempts=3 ..
//! INFO fanvisor: batch processed queue="img-created-queue" batch_size=5 acked=4
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer observer.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let queue = e.queue.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        let message = e.message.map(|id| id.to_string()).unwrap_or_default();

        match e.kind {
            EventKind::PublishFailed => warn!(
                seq = e.seq,
                topic = e.topic.as_deref().unwrap_or("-"),
                queue,
                attempts = e.attempt,
                reason,
                "subscriber delivery failed"
            ),
            EventKind::MessageDeadLettered => warn!(
                seq = e.seq,
                queue,
                %message,
                receive_count = e.receive_count,
                key = reason,
                "message dead-lettered"
            ),
            EventKind::HandlerTimeout => warn!(
                seq = e.seq,
                queue,
                timeout_ms = e.timeout_ms,
                pending = e.batch_size,
                "batch timed out"
            ),
            EventKind::QueueUnavailable => warn!(
                seq = e.seq,
                queue,
                consecutive = e.attempt,
                reason,
                "queue unavailable"
            ),
            EventKind::AckFailed => {
                warn!(seq = e.seq, queue, %message, reason, "acknowledge failed")
            }
            EventKind::MessageFailed if e.retryable == Some(false) => warn!(
                seq = e.seq,
                queue,
                %message,
                receive_count = e.receive_count,
                reason,
                retryable = false,
                "message failed permanently; redelivery will fail again"
            ),
            EventKind::MessageFailed => info!(
                seq = e.seq,
                queue,
                %message,
                receive_count = e.receive_count,
                reason,
                retryable = e.retryable,
                "message failed; left for redelivery"
            ),
            EventKind::BackoffScheduled => debug!(
                seq = e.seq,
                queue,
                delay_ms = e.delay_ms,
                consecutive = e.attempt,
                "poll backoff scheduled"
            ),
            EventKind::BatchReceived => {
                debug!(seq = e.seq, queue, batch_size = e.batch_size, "batch received")
            }
            EventKind::BatchProcessed => info!(
                seq = e.seq,
                queue,
                batch_size = e.batch_size,
                acked = e.acked,
                "batch processed"
            ),
            EventKind::MessageAcked => {
                debug!(seq = e.seq, queue, %message, "message acknowledged")
            }
            EventKind::DispatcherStarted => info!(seq = e.seq, queue, "dispatcher started"),
            EventKind::DispatcherStopped => info!(seq = e.seq, queue, "dispatcher stopped"),
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => {
                info!(seq = e.seq, "all dispatchers stopped within grace")
            }
            EventKind::GraceExceeded => error!(seq = e.seq, stuck = reason, "grace exceeded"),
            EventKind::SubscriberOverflow => {
                warn!(seq = e.seq, subscriber = queue, reason, "observer overflow")
            }
            EventKind::SubscriberPanicked => {
                warn!(seq = e.seq, subscriber = queue, reason, "observer panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
