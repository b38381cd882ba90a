//! # Queue contract.
//!
//! A [`Queue`] is a durable, at-least-once buffer with visibility-based
//! redelivery. Backends may be in-process ([`MemoryQueue`](crate::MemoryQueue))
//! or remote; the dispatcher only relies on this trait.
//!
//! ## Contract
//! - `enqueue` returns only once the message is held by the buffer.
//! - `receive` hands out up to `max` visible messages, hides each until its
//!   visibility deadline and increments its receive count. With nothing visible
//!   it waits (without busy polling) up to `wait` and may return an empty batch.
//! - `acknowledge` removes a message for good and is idempotent.
//! - A message whose deadline elapses without an acknowledgment becomes visible
//!   again, unless its receive count reached the policy maximum, in which case it
//!   is dead-lettered once and never delivered again.

use std::time::Duration;

use async_trait::async_trait;

use crate::broker::message::{Batch, Message, MessageId};
use crate::core::QueuePolicy;
use crate::error::QueueError;

/// Durable buffer owned by one subscriber.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Stable queue name (for logs and events).
    fn name(&self) -> &str;

    /// Appends a message.
    async fn enqueue(&self, message: Message) -> Result<(), QueueError>;

    /// Long-polls for up to `max` visible messages.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Batch, QueueError>;

    /// Permanently removes a message; unknown ids are not an error.
    async fn acknowledge(&self, id: MessageId) -> Result<(), QueueError>;

    /// Redelivery policy, when the backend exposes it.
    fn visibility_policy(&self) -> Option<QueuePolicy> {
        None
    }
}

/// Shared handle to a queue.
pub type QueueRef = std::sync::Arc<dyn Queue>;
