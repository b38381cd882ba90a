//! # fanvisor
//!
//! **Fanvisor** fans object-created events out to independent queues and
//! drains each queue with a supervised batch dispatcher.
//!
//! One ingress event becomes one message per subscriber queue. Every queue
//! hides a received message for a visibility window and hands it out again if
//! nobody acknowledged it, until a receive limit sends it to the dead-letter
//! path. Handlers report an outcome per message, so one bad message never
//! costs its batch siblings.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                    on_object_created(ObjectEvent)
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Topic (fan-out, per-subscriber enqueue retry)                    │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │  Queue #1  │     │  Queue #2  │     │  Queue #3  │   visibility timeout,
//!  │ (in-flight,│     │            │     │            │   receive count,
//!  │  DLQ)      │     │            │     │            │   dead letters
//!  └─────┬──────┘     └─────┬──────┘     └─────┬──────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │ Dispatcher │     │ Dispatcher │     │ Dispatcher │   long poll, batching
//!  │            │     │            │     │            │   window, ack/requeue
//!  └─────┬──────┘     └─────┬──────┘     └─────┬──────┘
//!        ▼                  ▼                  ▼
//!  ImageProcessor    BackupReplicator        Mailer       (any Handler)
//!
//!  Topic + Dispatchers ── Event ──► Bus ──► SubscriberSet ──► LogWriter, Counters, ...
//! ```
//!
//! ### Message lifecycle
//! ```text
//! enqueue ─► visible ─► receive (count += 1, hidden until deadline)
//!                          ├─ handler Ok  ─► acknowledge ─► gone
//!                          └─ handler Err / timeout / crash
//!                                ─► deadline passes
//!                                     ├─ count < max ─► visible again
//!                                     └─ count = max ─► dead-lettered once
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                              |
//! |-------------------|-------------------------------------------------------------|-------------------------------------------------|
//! | **Broker**        | Fan-out topic and visibility-timeout queues.                | [`Topic`], [`Queue`], [`MemoryQueue`]           |
//! | **Dispatch**      | Batched long-poll consumption with per-message outcomes.    | [`Dispatcher`], [`DispatcherState`]             |
//! | **Handlers**      | Pluggable batch or per-message handlers.                    | [`Handler`], [`MessageHandler`], [`HandlerFn`]  |
//! | **Lifecycle**     | Wiring, signals and grace-bounded shutdown.                 | [`Pipeline`], [`Route`]                         |
//! | **Observability** | Runtime events fanned out to observers.                     | [`Subscribe`], [`LogWriter`], [`Counters`]      |
//! | **Errors**        | Typed errors with stable labels.                            | [`PipelineError`], [`HandlerError`]             |
//! | **Configuration** | Defaults for budgets, policies and shutdown.                | [`PipelineConfig`], [`DispatcherConfig`]        |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fanvisor::{
//!     BackupReplicator, Counters, DispatcherConfig, MemoryQueue, MemoryStore, ObjectEvent,
//!     PerMessage, Pipeline, PipelineConfig, QueuePolicy, Route, Subscribe,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = MemoryStore::arc();
//!     let backups = MemoryStore::arc();
//!     source.put("cat.png", b"\x89PNG\r\n\x1a\n".to_vec()).await;
//!
//!     let counters = Arc::new(Counters::new());
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![counters.clone()];
//!
//!     let queue = MemoryQueue::arc("img-backup-queue", QueuePolicy::default());
//!     let backup = PerMessage::arc(BackupReplicator::new(source, backups.clone()));
//!
//!     let pipeline = Pipeline::builder(PipelineConfig::default())
//!         .with_topic_name("new-image")
//!         .with_route(Route::new(queue, backup).with_config(DispatcherConfig {
//!             batch_window: Duration::from_millis(50),
//!             ..DispatcherConfig::default()
//!         }))
//!         .with_subscribers(subs)
//!         .build()?;
//!
//!     pipeline.start().await;
//!     pipeline.on_object_created(ObjectEvent::new("images", "cat.png", 8)).await?;
//!
//!     // The batching window holds the message briefly before dispatch.
//!     tokio::time::sleep(Duration::from_millis(300)).await;
//!     assert!(backups.contains("backup/cat.png").await);
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod broker;
mod core;
mod error;
mod events;
mod external;
mod handlers;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use broker::{
    Batch, MemoryQueue, Message, MessageId, ObjectEvent, PublishReport, Queue, QueueRef,
    QueueStats, Topic,
};
pub use crate::core::{
    Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherState, Pipeline, PipelineBuilder,
    PipelineConfig, QueuePolicy, Route,
};
pub use error::{
    DeliveryFailure, HandlerError, NotifyError, PipelineError, QueueError, RuntimeError,
    StoreError,
};
pub use events::{Bus, Event, EventKind};
pub use external::{Mail, MemoryStore, Notifier, ObjectStore, Outbox};
pub use handlers::{
    BackupReplicator, BatchContext, BatchOutcome, Handler, HandlerFn, HandlerRef, ImageFormat,
    ImageProcessor, Mailer, MessageHandler, PerMessage, Transform,
};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use subscribers::{Counters, LogWriter, QueueCounters, Subscribe, SubscriberSet};
