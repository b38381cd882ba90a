//! # Dispatcher: batch poll loop for one queue.
//!
//! Drains one [`Queue`](crate::Queue) into one [`Handler`] in batches.
//!
//! ## State machine
//! ```text
//! Idle ──► Polling ──► Processing ──► Acking ──► Requeueing ──► Polling ...
//!            │  ▲                       (skipped when empty)
//!            │  └── QueueUnavailable: BackoffScheduled → sleep
//!            ▼
//!         Stopped (from any state once STOP is observed)
//! ```
//!
//! ## Batching window
//! ```text
//! receive(batch_size, wait_time)        ── first message(s) arrive at t0
//! while held < batch_size && now < t0 + batch_window:
//!     receive(batch_size - held, remaining window)
//! ```
//!
//! ## Rules
//! - STOP is observed only between cycles and while waiting on the queue;
//!   a batch already held (even a partial window) is processed and acked.
//! - Each success is acked on its own; a failed ack is reported and the message
//!   is left for redelivery.
//! - Failures are never retried here. The queue's visibility timeout
//!   redelivers them.
//! - Receive errors never end the loop.

use std::collections::HashMap;

use tokio::{select, sync::watch, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    broker::{Batch, Message, MessageId, QueueRef},
    core::{DispatcherConfig, runner::process_batch},
    error::{HandlerError, PipelineError, QueueError},
    events::{Bus, Event, EventKind},
    handlers::HandlerRef,
};

/// Lifecycle state of a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    /// Created, not yet running.
    Idle,
    /// Waiting on the queue (long poll or batching window).
    Polling,
    /// A batch is in the handler.
    Processing,
    /// Acknowledging successes.
    Acking,
    /// Leaving failures to redelivery.
    Requeueing,
    /// Terminal.
    Stopped,
}

impl DispatcherState {
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Polling => "polling",
            DispatcherState::Processing => "processing",
            DispatcherState::Acking => "acking",
            DispatcherState::Requeueing => "requeueing",
            DispatcherState::Stopped => "stopped",
        }
    }
}

/// Read side of a dispatcher's state, usable after the dispatcher was moved into its task.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    queue: String,
    state: watch::Receiver<DispatcherState>,
}

impl DispatcherHandle {
    /// Name of the drained queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Waits until the dispatcher reaches `target`.
    ///
    /// Returns immediately if it is already there. Returns `false` if the
    /// dispatcher was dropped before reaching it.
    pub async fn wait_for(&mut self, target: DispatcherState) -> bool {
        self.state.wait_for(|s| *s == target).await.is_ok()
    }
}

enum Poll {
    Batch(Batch),
    Stopped,
}

/// Drains one queue into one handler.
pub struct Dispatcher {
    queue: QueueRef,
    handler: HandlerRef,
    cfg: DispatcherConfig,
    bus: Bus,
    state: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    /// Creates an idle dispatcher.
    pub fn new(queue: QueueRef, handler: HandlerRef, cfg: DispatcherConfig, bus: Bus) -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);
        Self {
            queue,
            handler,
            cfg,
            bus,
            state,
        }
    }

    /// Returns an observer of this dispatcher's state.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            queue: self.queue.name().to_string(),
            state: self.state.subscribe(),
        }
    }

    /// Runs until `stop` is cancelled.
    ///
    /// `abandon` is the parent of every handler token; cancelling it asks an
    /// in-flight batch to give up (forced shutdown).
    pub async fn run(self, stop: CancellationToken, abandon: CancellationToken) {
        let queue = self.queue.name().to_string();
        debug!(queue = %queue, handler = self.handler.name(), "dispatcher started");
        self.bus
            .publish(Event::new(EventKind::DispatcherStarted).with_queue(queue.as_str()));

        let mut failures: u32 = 0;
        loop {
            if stop.is_cancelled() {
                break;
            }
            self.set(DispatcherState::Polling);

            match self.poll(&stop).await {
                Ok(Poll::Stopped) => break,
                Ok(Poll::Batch(batch)) => {
                    failures = 0;
                    if !batch.is_empty() {
                        self.dispatch(batch, &abandon).await;
                    }
                }
                Err(error) => {
                    let delay = self.cfg.poll_backoff.next(failures);
                    failures = failures.saturating_add(1);

                    let err = PipelineError::QueueUnavailable {
                        queue: queue.clone(),
                        error,
                    };
                    warn!(error = %err, attempt = failures, ?delay, "receive failed");
                    self.bus.publish(
                        Event::new(EventKind::QueueUnavailable)
                            .with_queue(queue.as_str())
                            .with_attempt(failures)
                            .with_reason(err.to_string()),
                    );
                    self.bus.publish(
                        Event::new(EventKind::BackoffScheduled)
                            .with_queue(queue.as_str())
                            .with_attempt(failures)
                            .with_delay(delay),
                    );

                    select! {
                        _ = time::sleep(delay) => {}
                        _ = stop.cancelled() => break,
                    }
                }
            }
        }

        self.set(DispatcherState::Stopped);
        debug!(queue = %queue, "dispatcher stopped");
        self.bus
            .publish(Event::new(EventKind::DispatcherStopped).with_queue(queue.as_str()));
    }

    fn set(&self, state: DispatcherState) {
        self.state.send_replace(state);
    }

    /// Long-polls for a first batch, then fills it within the batching window.
    async fn poll(&self, stop: &CancellationToken) -> Result<Poll, QueueError> {
        let size = self.cfg.batch_size;

        let mut batch = select! {
            biased;
            _ = stop.cancelled() => return Ok(Poll::Stopped),
            res = self.queue.receive(size, self.cfg.wait_time) => res?,
        };
        self.report_dead_letters(&mut batch);
        if batch.is_empty() {
            return Ok(Poll::Batch(batch));
        }

        let window_end = time::Instant::now() + self.cfg.batch_window;
        while batch.len() < size {
            let now = time::Instant::now();
            if now >= window_end {
                break;
            }
            let more = select! {
                biased;
                _ = stop.cancelled() => break,
                res = self.queue.receive(size - batch.len(), window_end - now) => res,
            };
            match more {
                Ok(mut more) => {
                    self.report_dead_letters(&mut more);
                    batch.absorb(more);
                }
                Err(e) => {
                    warn!(
                        queue = self.queue.name(),
                        error = %e,
                        held = batch.len(),
                        "receive failed inside batching window"
                    );
                    break;
                }
            }
        }
        Ok(Poll::Batch(batch))
    }

    fn report_dead_letters(&self, batch: &mut Batch) {
        for msg in batch.take_dead_lettered() {
            let err = PipelineError::MaxRedeliveryExceeded {
                queue: self.queue.name().to_string(),
                message: msg.id,
                receive_count: msg.receive_count,
            };
            warn!(error = %err, key = %msg.event.key, "dead-lettered");
            self.bus.publish(
                Event::new(EventKind::MessageDeadLettered)
                    .with_queue(self.queue.name())
                    .with_message(msg.id)
                    .with_receive_count(msg.receive_count),
            );
        }
    }

    /// Processing → Acking → Requeueing for one batch.
    async fn dispatch(&self, batch: Batch, abandon: &CancellationToken) {
        let queue = self.queue.name();
        self.set(DispatcherState::Processing);
        self.bus.publish(
            Event::new(EventKind::BatchReceived)
                .with_queue(queue)
                .with_batch_size(batch.len()),
        );

        let mut outcomes = process_batch(
            self.handler.as_ref(),
            &batch,
            queue,
            &self.cfg,
            abandon,
            &self.bus,
        )
        .await;

        let (succeeded, failed) = split(&batch, &mut outcomes);

        let mut acked = 0usize;
        if !succeeded.is_empty() {
            self.set(DispatcherState::Acking);
            for msg in succeeded {
                match self.queue.acknowledge(msg.id).await {
                    Ok(()) => {
                        acked += 1;
                        self.bus.publish(
                            Event::new(EventKind::MessageAcked)
                                .with_queue(queue)
                                .with_message(msg.id)
                                .with_receive_count(msg.receive_count),
                        );
                    }
                    Err(e) => {
                        warn!(
                            queue,
                            message = %msg.id,
                            error = %e,
                            "ack failed; message will be redelivered"
                        );
                        self.bus.publish(
                            Event::new(EventKind::AckFailed)
                                .with_queue(queue)
                                .with_message(msg.id)
                                .with_reason(e.to_string()),
                        );
                    }
                }
            }
        }

        if !failed.is_empty() {
            self.set(DispatcherState::Requeueing);
            for (msg, error) in failed {
                let reason = error.to_string();
                let retryable = error.is_retryable();
                let err = PipelineError::HandlerFailure {
                    queue: queue.to_string(),
                    message: msg.id,
                    error,
                };
                debug!(error = %err, receive_count = msg.receive_count, "left for redelivery");
                self.bus.publish(
                    Event::new(EventKind::MessageFailed)
                        .with_queue(queue)
                        .with_message(msg.id)
                        .with_receive_count(msg.receive_count)
                        .with_reason(reason)
                        .with_retryable(retryable),
                );
            }
        }

        self.bus.publish(
            Event::new(EventKind::BatchProcessed)
                .with_queue(queue)
                .with_batch_size(batch.len())
                .with_acked(acked),
        );
    }
}

/// Splits a batch by outcome, keeping batch order.
fn split<'a>(
    batch: &'a Batch,
    outcomes: &mut HashMap<MessageId, Result<(), HandlerError>>,
) -> (Vec<&'a Message>, Vec<(&'a Message, HandlerError)>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for msg in &batch.messages {
        match outcomes.remove(&msg.id) {
            Some(Ok(())) => ok.push(msg),
            Some(Err(e)) => failed.push((msg, e)),
            None => failed.push((msg, HandlerError::failed("no outcome reported"))),
        }
    }
    (ok, failed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::broker::{MemoryQueue, ObjectEvent, Queue};
    use crate::core::QueuePolicy;
    use crate::error::QueueError;
    use crate::handlers::{BatchContext, BatchOutcome, Handler};

    /// Records batch sizes and the time they arrived.
    /// Fails keys starting with "fail" and rejects keys starting with "bad" as malformed.
    struct Recorder {
        sizes: std::sync::Mutex<Vec<(usize, time::Instant)>>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn arc() -> Arc<Self> {
            Arc::new(Self {
                sizes: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle_batch(&self, batch: &Batch, _ctx: &BatchContext) -> BatchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes
                .lock()
                .unwrap()
                .push((batch.len(), time::Instant::now()));
            batch
                .messages
                .iter()
                .map(|m| {
                    let key = m.event.key.as_str();
                    let res = if key.starts_with("fail") {
                        Err(HandlerError::failed("boom"))
                    } else if key.starts_with("bad") {
                        Err(HandlerError::MalformedPayload {
                            reason: "empty key".into(),
                        })
                    } else {
                        Ok(())
                    };
                    (m.id, res)
                })
                .collect()
        }
    }

    fn event(key: &str) -> ObjectEvent {
        ObjectEvent::new("images", key, 1)
    }

    fn spawn(
        queue: Arc<MemoryQueue>,
        recorder: Arc<Recorder>,
        cfg: DispatcherConfig,
    ) -> (DispatcherHandle, CancellationToken, tokio::task::JoinHandle<()>) {
        let d = Dispatcher::new(queue, recorder, cfg, Bus::new(64));
        let handle = d.handle();
        let stop = CancellationToken::new();
        let join = tokio::spawn(d.run(stop.clone(), CancellationToken::new()));
        (handle, stop, join)
    }

    #[tokio::test(start_paused = true)]
    async fn window_collects_trickling_messages_into_one_batch() {
        let queue = MemoryQueue::arc("q", QueuePolicy::default());
        let recorder = Recorder::arc();
        let start = time::Instant::now();
        let (_h, stop, join) = spawn(queue.clone(), recorder.clone(), DispatcherConfig::default());

        queue.enqueue(Message::new(event("a"))).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(Message::new(event("b"))).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(Message::new(event("c"))).await.unwrap();

        time::sleep(Duration::from_secs(10)).await;
        stop.cancel();
        join.await.unwrap();

        let sizes = recorder.sizes.lock().unwrap().clone();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].0, 3);
        assert_eq!(sizes[0].1 - start, Duration::from_secs(5));
        assert_eq!(queue.stats().await.visible + queue.stats().await.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_skips_the_rest_of_the_window() {
        let queue = MemoryQueue::arc("q", QueuePolicy::default());
        for k in ["a", "b", "c", "d", "e", "f"] {
            queue.enqueue(Message::new(event(k))).await.unwrap();
        }
        let recorder = Recorder::arc();
        let start = time::Instant::now();
        let (_h, stop, join) = spawn(queue.clone(), recorder.clone(), DispatcherConfig::default());

        time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        join.await.unwrap();

        let sizes = recorder.sizes.lock().unwrap().clone();
        assert_eq!(sizes[0].0, 5);
        assert_eq!(sizes[0].1, start);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stay_in_flight_and_successes_are_acked() {
        let queue = MemoryQueue::arc("q", QueuePolicy::default());
        for k in ["ok-1", "fail-2", "ok-3"] {
            queue.enqueue(Message::new(event(k))).await.unwrap();
        }
        let recorder = Recorder::arc();
        let (_h, stop, join) = spawn(queue.clone(), recorder, DispatcherConfig::default());

        time::sleep(Duration::from_secs(6)).await;
        stop.cancel();
        join.await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.visible, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_idle_reaches_stopped() {
        let queue = MemoryQueue::arc("q", QueuePolicy::default());
        let (mut h, stop, join) = spawn(queue, Recorder::arc(), DispatcherConfig::default());
        assert!(h.wait_for(DispatcherState::Polling).await);

        stop.cancel();
        join.await.unwrap();
        assert_eq!(h.state(), DispatcherState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_backs_off_without_exiting() {
        let queue = MemoryQueue::arc("q", QueuePolicy::default());
        queue.close().await;

        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let d = Dispatcher::new(queue, Recorder::arc(), DispatcherConfig::default(), bus);
        let stop = CancellationToken::new();
        let join = tokio::spawn(d.run(stop.clone(), CancellationToken::new()));

        time::sleep(Duration::from_secs(3)).await;
        assert!(!join.is_finished());
        stop.cancel();
        join.await.unwrap();

        let mut unavailable = 0;
        let mut backoffs = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                EventKind::QueueUnavailable => unavailable += 1,
                EventKind::BackoffScheduled => backoffs.push(ev.attempt),
                _ => {}
            }
        }
        assert!(unavailable >= 2);
        assert_eq!(backoffs[0], Some(1));
        assert_eq!(backoffs[1], Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_events_carry_retryability() {
        let queue = MemoryQueue::arc("q", QueuePolicy::default());
        for k in ["fail-1", "bad-2"] {
            queue.enqueue(Message::new(event(k))).await.unwrap();
        }
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let cfg = DispatcherConfig {
            batch_window: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        let d = Dispatcher::new(queue, Recorder::arc(), cfg, bus);
        let stop = CancellationToken::new();
        let join = tokio::spawn(d.run(stop.clone(), CancellationToken::new()));

        time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        join.await.unwrap();

        let mut failed = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::MessageFailed {
                failed.push(ev.retryable);
            }
        }
        assert_eq!(failed, vec![Some(true), Some(false)]);
    }

    /// Dead-letter queue whose `enqueue` never completes.
    struct Stalled;

    #[async_trait]
    impl Queue for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn enqueue(&self, _message: Message) -> Result<(), QueueError> {
            std::future::pending().await
        }
        async fn receive(&self, _max: usize, _wait: Duration) -> Result<Batch, QueueError> {
            Ok(Batch::default())
        }
        async fn acknowledge(&self, _id: MessageId) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dead_letter_is_reported_even_if_stopped_while_forwarding() {
        let policy = QueuePolicy {
            visibility_timeout: Duration::from_secs(1),
            max_receive_count: 1,
        };
        let queue = Arc::new(
            MemoryQueue::new("q", policy).with_dead_letter_queue(Arc::new(Stalled)),
        );
        queue.enqueue(Message::new(event("fail-1"))).await.unwrap();

        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let cfg = DispatcherConfig {
            batch_window: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        let d = Dispatcher::new(queue.clone(), Recorder::arc(), cfg, bus);
        let stop = CancellationToken::new();
        let join = tokio::spawn(d.run(stop.clone(), CancellationToken::new()));

        time::sleep(Duration::from_secs(3)).await;
        stop.cancel();
        join.await.unwrap();

        let mut reported = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::MessageDeadLettered {
                reported += 1;
                assert_eq!(ev.receive_count, Some(1));
            }
        }
        assert_eq!(reported, 1);
        assert_eq!(queue.dead_letters().await.len(), 1);
    }
}
