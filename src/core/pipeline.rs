//! # Pipeline: ingress, dispatchers and lifecycle.
//!
//! The [`Pipeline`] owns the event bus, the ingress [`Topic`], one
//! [`Dispatcher`] per route and the [`SubscriberSet`] of observers.
//!
//! ## High-level architecture
//! ```text
//! on_object_created(event)
//!     └─► Topic::publish ──► enqueue copy ──► Queue[0]   Queue[1] ... Queue[N-1]
//!                                               │          │             │
//! start():                                 Dispatcher  Dispatcher ... Dispatcher   (one task each)
//!                                               │          │             │
//!                                           Handler    Handler   ...  Handler
//!
//! Event flow:
//!   Topic / Dispatchers ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit(&Event)
//!                                                                     ├─► worker S1 ─► on_event
//!                                                                     └─► worker SN ─► on_event
//!
//! Shutdown path:
//!   Bus.publish(ShutdownRequested)
//!   stop.cancel()                 → dispatchers finish the batch in hand, start no new poll
//!   wait_all_with_grace(cfg.grace):
//!       ├─ all joined   → Bus.publish(AllStoppedWithin)
//!       └─ grace passed → abandon.cancel(), abort tasks, Bus.publish(GraceExceeded)
//!                         → RuntimeError::GraceExceeded { stuck }
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use fanvisor::{
//!     HandlerFn, MemoryQueue, Message, ObjectEvent, Pipeline, PipelineConfig, QueuePolicy, Route,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
//!     let handler = HandlerFn::arc("print", |msg: Message, _token| async move {
//!         println!("got {}", msg.event.key);
//!         Ok(())
//!     });
//!
//!     let pipeline = Pipeline::builder(PipelineConfig {
//!         grace: Duration::from_secs(1),
//!         ..PipelineConfig::default()
//!     })
//!     .with_topic_name("new-image")
//!     .with_route(Route::new(queue, handler))
//!     .build()?;
//!
//!     pipeline.start().await;
//!     pipeline.on_object_created(ObjectEvent::new("images", "cat.png", 1024)).await?;
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::{
    sync::{Mutex, broadcast::error::RecvError},
    task::JoinSet,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    broker::{ObjectEvent, PublishReport, Topic},
    core::{PipelineConfig, shutdown},
    error::{PipelineError, RuntimeError},
    events::{Bus, Event, EventKind},
    subscribers::SubscriberSet,
};
use super::{
    builder::PipelineBuilder,
    dispatcher::{Dispatcher, DispatcherHandle, DispatcherState},
};

/// Topic fan-out plus one supervised dispatcher per queue.
pub struct Pipeline {
    cfg: PipelineConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    topic: Topic,
    handles: Vec<DispatcherHandle>,
    pending: Mutex<Vec<Dispatcher>>,
    running: Mutex<JoinSet<()>>,
    started: AtomicBool,
    stop: CancellationToken,
    abandon: CancellationToken,
}

impl Pipeline {
    /// Starts building a pipeline.
    pub fn builder(cfg: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: PipelineConfig,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        topic: Topic,
        dispatchers: Vec<Dispatcher>,
    ) -> Self {
        let handles = dispatchers.iter().map(Dispatcher::handle).collect();
        Self {
            cfg,
            bus,
            subs,
            topic,
            handles,
            pending: Mutex::new(dispatchers),
            running: Mutex::new(JoinSet::new()),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            abandon: CancellationToken::new(),
        }
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    pub(super) fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Ingress: fans `event` out to every routed queue.
    ///
    /// # Errors
    /// [`PipelineError::PublishPartialFailure`] if any queue kept rejecting
    /// the message; the other queues still hold their copy.
    pub async fn on_object_created(
        &self,
        event: ObjectEvent,
    ) -> Result<PublishReport, PipelineError> {
        self.topic.publish(event).await
    }

    /// Spawns one dispatcher task per route. Calling it again is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pending = self.pending.lock().await;
        let mut set = self.running.lock().await;
        for d in pending.drain(..) {
            set.spawn(d.run(self.stop.clone(), self.abandon.clone()));
        }
        info!(topic = self.topic.name(), dispatchers = set.len(), "pipeline started");
    }

    /// Starts, waits for a termination signal or [`Pipeline::shutdown_token`]
    /// cancellation, then shuts down gracefully.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        self.start().await;

        let signal = async {
            if let Err(e) = shutdown::wait_for_shutdown_signal().await {
                warn!(error = %e, "signal handlers unavailable; waiting for shutdown token only");
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = signal => {}
            _ = self.stop.cancelled() => {}
        }
        self.shutdown().await
    }

    /// Stops every dispatcher and waits up to `cfg.grace` for them to drain.
    ///
    /// # Errors
    /// [`RuntimeError::GraceExceeded`] if some dispatcher was still busy when
    /// the grace period ran out; those tasks are aborted and their messages
    /// come back after the visibility timeout.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.stop.cancel();

        let mut set = self.running.lock().await;
        self.wait_all_with_grace(&mut set).await
    }

    async fn wait_all_with_grace(&self, set: &mut JoinSet<()>) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let done = async { while set.join_next().await.is_some() {} };
        let timed = time::timeout(grace, done).await;

        match timed {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<String> = self
                    .handles
                    .iter()
                    .filter(|h| h.state() != DispatcherState::Stopped)
                    .map(|h| h.queue().to_string())
                    .collect();

                self.abandon.cancel();
                set.abort_all();
                while set.join_next().await.is_some() {}

                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Cancelling this token makes [`Pipeline::run`] shut down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Current state of every dispatcher, in route order.
    pub fn dispatcher_states(&self) -> Vec<(String, DispatcherState)> {
        self.handles
            .iter()
            .map(|h| (h.queue().to_string(), h.state()))
            .collect()
    }

    /// Observers of every dispatcher, in route order.
    pub fn dispatchers(&self) -> &[DispatcherHandle] {
        &self.handles
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// The runtime event bus; subscribe here for raw events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}
