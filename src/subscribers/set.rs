//! # SubscriberSet: non-blocking fan-out over observers
//!
//! ## Guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-observer FIFO.
//! - Panics inside observers are caught and reported (isolation).
//!
//! ## Not guaranteed
//! - Ordering across observers.
//! - Delivery on overflow: a full queue drops the event for that observer only.
//!
//! ```text
//!    emit(&Event)
//!        ├──► [queue O1] ─► worker O1 ─► on_event()
//!        ├──► [queue O2] ─► worker O2 ─► on_event()
//!        └──► [queue ON] ─► worker ON ─► on_event()
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::warn;

use crate::events::{Bus, Event};
use crate::handlers::panic_message;

use super::Subscribe;

struct Channel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Per-observer bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<Channel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per observer. Overflow and panics are reported on `bus`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()));
                    if let Err(panic) = fut.catch_unwind().await {
                        let info = panic_message(&*panic);
                        warn!(subscriber = name, %info, "observer panicked");
                        worker_bus.publish(Event::subscriber_panicked(name, info));
                    }
                }
            });

            channels.push(Channel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Fans out one event (non-blocking).
    ///
    /// Overflow of an internal event is not re-published, to avoid feedback loops.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for ch in &self.channels {
            let reason = match ch.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            warn!(subscriber = ch.name, reason, seq = event.seq, "observer dropped event");
            if !event.is_internal() {
                self.bus.publish(Event::subscriber_overflow(ch.name, reason));
            }
        }
    }

    /// Closes all queues and waits for workers to drain.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}
