//! # In-process queue with visibility timeouts and dead-lettering.
//!
//! [`MemoryQueue`] implements the [`Queue`] contract on top of a mutex-guarded
//! map and a `tokio::sync::Notify` used for long-polling.
//!
//! ## Message states
//! ```text
//!            enqueue
//!               │
//!               ▼
//!  ┌────────► visible ──receive──► in-flight ──acknowledge──► removed
//!  │                                  │
//!  │                 deadline elapsed │
//!  └──────────── count < limit ◄──────┤
//!                                     └── count >= limit ──► dead-lettered
//! ```
//!
//! ## Rules
//! - `receive` increments `receive_count` on every hand-out (first delivery = 1).
//! - Expired in-flight messages are reclaimed lazily, on the next `receive`.
//!   A waiting receiver wakes at the earliest deadline so reclamation is timely.
//! - Reclaimed messages go to the **back** of the visible order.
//! - Dead-lettered messages are kept in [`MemoryQueue::dead_letters`], forwarded
//!   to the optional dead-letter queue, and reported through
//!   [`Batch::dead_lettered`] of the receive that reclaimed them. That receive
//!   returns at once, with no await point between reclaim and return, so a
//!   caller that drops the future cannot lose the report.
//! - `enqueue` starts every message fresh: `receive_count` is reset to 0 and
//!   `enqueued_at` to now. A dead-letter queue counts its own deliveries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::broker::message::{Batch, Message, MessageId};
use crate::broker::queue::{Queue, QueueRef};
use crate::core::QueuePolicy;
use crate::error::QueueError;

/// Point-in-time queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting to be received.
    pub visible: usize,
    /// Messages received and not yet acknowledged.
    pub in_flight: usize,
    /// Messages moved to the dead-letter path so far.
    pub dead_lettered: usize,
}

#[derive(Default)]
struct State {
    closed: bool,
    messages: HashMap<MessageId, Message>,
    ready: VecDeque<MessageId>,
    in_flight: HashSet<MessageId>,
    dead: Vec<Message>,
}

impl State {
    /// Returns expired in-flight messages to the visible set or dead-letters them.
    fn reclaim(&mut self, now: Instant, limit: Option<u32>) -> Vec<Message> {
        let expired: Vec<MessageId> = self
            .in_flight
            .iter()
            .filter(|id| {
                self.messages
                    .get(*id)
                    .and_then(|m| m.visible_at)
                    .is_none_or(|at| at <= now)
            })
            .copied()
            .collect();

        let mut dead = Vec::new();
        for id in expired {
            self.in_flight.remove(&id);
            let Some(msg) = self.messages.get_mut(&id) else {
                continue;
            };
            msg.visible_at = None;

            if limit.is_some_and(|max| msg.receive_count >= max) {
                if let Some(msg) = self.messages.remove(&id) {
                    self.dead.push(msg.clone());
                    dead.push(msg);
                }
            } else {
                self.ready.push_back(id);
            }
        }
        dead
    }

    /// Hands out up to `max` visible messages, hiding each until `deadline`.
    fn take_visible(&mut self, max: usize, deadline: Instant) -> Vec<Message> {
        let mut out = Vec::with_capacity(max.min(self.ready.len()));
        while out.len() < max {
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            // Acknowledged while visible: stale entry.
            let Some(msg) = self.messages.get_mut(&id) else {
                continue;
            };
            if msg.visible_at.is_some() {
                continue;
            }
            msg.receive_count += 1;
            msg.visible_at = Some(deadline);
            self.in_flight.insert(id);
            out.push(msg.clone());
        }
        out
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight
            .iter()
            .filter_map(|id| self.messages.get(id).and_then(|m| m.visible_at))
            .min()
    }
}

/// In-process implementation of [`Queue`].
///
/// # Example
/// ```
/// use std::time::{Duration, SystemTime};
/// use fanvisor::{MemoryQueue, Message, ObjectEvent, Queue, QueuePolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fanvisor::QueueError> {
/// let q = MemoryQueue::new("img-created-queue", QueuePolicy::default());
/// q.enqueue(Message::new(ObjectEvent::new("images", "a.png", 3))).await?;
///
/// let batch = q.receive(5, Duration::from_millis(10)).await?;
/// assert_eq!(batch.len(), 1);
/// assert_eq!(batch.messages[0].receive_count, 1);
///
/// q.acknowledge(batch.messages[0].id).await?;
/// q.acknowledge(batch.messages[0].id).await?; // idempotent
/// # Ok(())
/// # }
/// ```
pub struct MemoryQueue {
    name: String,
    policy: QueuePolicy,
    state: Mutex<State>,
    notify: Notify,
    dead_letter: Option<QueueRef>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new(name: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            dead_letter: None,
        }
    }

    /// Creates an empty queue behind an `Arc`.
    pub fn arc(name: impl Into<String>, policy: QueuePolicy) -> Arc<Self> {
        Arc::new(Self::new(name, policy))
    }

    /// Forwards dead-lettered messages into `queue` as well.
    pub fn with_dead_letter_queue(mut self, queue: QueueRef) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    /// The redelivery policy of this queue.
    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Current depth.
    pub async fn stats(&self) -> QueueStats {
        let st = self.state.lock().await;
        QueueStats {
            visible: st.messages.len() - st.in_flight.len(),
            in_flight: st.in_flight.len(),
            dead_lettered: st.dead.len(),
        }
    }

    /// Copies of every message dead-lettered so far.
    pub async fn dead_letters(&self) -> Vec<Message> {
        self.state.lock().await.dead.clone()
    }

    /// Closes the queue: later `enqueue`/`receive` calls fail with [`QueueError::Closed`].
    ///
    /// Pending receivers are woken. Acknowledgments are still accepted.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Hands dead letters to the dead-letter queue on a detached task.
    fn forward_dead_letters(&self, dead: &[Message]) {
        for msg in dead {
            debug!(
                queue = %self.name,
                message = %msg.id,
                receive_count = msg.receive_count,
                "receive limit reached"
            );
        }
        let Some(dlq) = self.dead_letter.clone() else {
            return;
        };
        let queue = self.name.clone();
        let dead = dead.to_vec();
        tokio::spawn(async move {
            for msg in dead {
                if let Err(e) = dlq.enqueue(msg).await {
                    warn!(
                        queue = %queue,
                        dlq = dlq.name(),
                        error = %e,
                        "dead-letter forward failed"
                    );
                }
            }
        });
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn visibility_policy(&self) -> Option<QueuePolicy> {
        Some(self.policy)
    }

    async fn enqueue(&self, mut message: Message) -> Result<(), QueueError> {
        {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(QueueError::Closed);
            }
            message.visible_at = None;
            message.receive_count = 0;
            message.enqueued_at = SystemTime::now();
            let id = message.id;
            if st.messages.insert(id, message).is_none() {
                st.ready.push_back(id);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Batch, QueueError> {
        let mut batch = Batch::default();
        if max == 0 {
            return Ok(batch);
        }
        let give_up = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (dead, next_expiry) = {
                let mut st = self.state.lock().await;
                if st.closed {
                    return Err(QueueError::Closed);
                }
                let now = Instant::now();
                let dead = st.reclaim(now, self.policy.receive_limit());
                batch.messages = st.take_visible(max, now + self.policy.visibility_timeout);
                (dead, st.next_expiry())
            };

            if !dead.is_empty() {
                self.forward_dead_letters(&dead);
                batch.dead_lettered.extend(dead);
            }
            let has_work = !batch.messages.is_empty() || !batch.dead_lettered.is_empty();
            if has_work || Instant::now() >= give_up {
                debug!(queue = %self.name, received = batch.len(), "receive returned");
                return Ok(batch);
            }

            let wake = next_expiry.map_or(give_up, |at| at.min(give_up));
            tokio::select! {
                _ = &mut notified => {}
                _ = time::sleep_until(wake) => {}
            }
        }
    }

    async fn acknowledge(&self, id: MessageId) -> Result<(), QueueError> {
        let mut st = self.state.lock().await;
        if st.messages.remove(&id).is_some() {
            st.in_flight.remove(&id);
        }
        Ok(())
    }
}
