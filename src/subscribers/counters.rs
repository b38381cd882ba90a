//! # Counters: per-queue tallies of runtime events.
//!
//! ```text
//! MessageAcked        → acked += 1
//! MessageFailed       → failed += 1
//! MessageDeadLettered → dead_lettered += 1
//! PublishFailed       → publish_failures += 1
//! QueueUnavailable    → unavailable += 1
//! HandlerTimeout      → timeouts += 1
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Tallies for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    pub batches: u64,
    pub acked: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub publish_failures: u64,
    pub unavailable: u64,
    pub timeouts: u64,
}

/// Observer keeping [`QueueCounters`] per queue name.
#[derive(Default)]
pub struct Counters {
    state: RwLock<HashMap<String, QueueCounters>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of one queue (zero if never seen).
    pub async fn get(&self, queue: &str) -> QueueCounters {
        self.state.read().await.get(queue).copied().unwrap_or_default()
    }

    /// All counters, sorted by queue name.
    pub async fn snapshot(&self) -> Vec<(String, QueueCounters)> {
        let mut all: Vec<_> = self
            .state
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[async_trait]
impl Subscribe for Counters {
    async fn on_event(&self, e: &Event) {
        if e.is_internal() {
            return;
        }
        let Some(queue) = e.queue.as_deref() else {
            return;
        };

        let mut state = self.state.write().await;
        let c = state.entry(queue.to_string()).or_default();
        match e.kind {
            EventKind::BatchProcessed => c.batches += 1,
            EventKind::MessageAcked => c.acked += 1,
            EventKind::MessageFailed => c.failed += 1,
            EventKind::MessageDeadLettered => c.dead_lettered += 1,
            EventKind::PublishFailed => c.publish_failures += 1,
            EventKind::QueueUnavailable => c.unavailable += 1,
            EventKind::HandlerTimeout => c.timeouts += 1,
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "Counters"
    }
}
