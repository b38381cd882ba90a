//! # Per-message handlers and the bounded-concurrency batch adapter.
//!
//! [`PerMessage`] runs a [`MessageHandler`] over every message of a batch with
//! at most `ctx.concurrency()` messages in flight
//! (`futures::StreamExt::buffer_unordered`). A panic in one message is caught
//! and turned into [`HandlerError::Panicked`] for that message only.
//!
//! ```text
//! Batch [m1 m2 m3 m4 m5] ──► stream ──buffer_unordered(n)──► handle_message(mi)
//!                                                              │
//!                                      ctx.record(mi, result) ◄┘
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream};

use crate::broker::{Batch, Message, MessageId};
use crate::error::HandlerError;
use crate::handlers::handler::{BatchContext, BatchOutcome, Handler};

/// Handles one message at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn handle_message(
        &self,
        message: &Message,
        ctx: &BatchContext,
    ) -> Result<(), HandlerError>;
}

/// Adapts a [`MessageHandler`] into a batch [`Handler`].
pub struct PerMessage<H> {
    inner: H,
}

impl<H: MessageHandler> PerMessage<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    /// Wraps and shares in one step.
    pub fn arc(inner: H) -> Arc<Self> {
        Arc::new(Self::new(inner))
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: MessageHandler> Handler for PerMessage<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle_batch(&self, batch: &Batch, ctx: &BatchContext) -> BatchOutcome {
        let limit = ctx.concurrency().unwrap_or(batch.len()).max(1);
        let runs: Vec<_> = batch
            .messages
            .iter()
            .map(|msg| run_one(&self.inner, msg, ctx))
            .collect();

        stream::iter(runs)
            .buffer_unordered(limit)
            .collect::<BatchOutcome>()
            .await
    }
}

/// Handles one message, turning a panic into a failure, and records the result.
async fn run_one<H: MessageHandler>(
    handler: &H,
    msg: &Message,
    ctx: &BatchContext,
) -> (MessageId, Result<(), HandlerError>) {
    let res = match AssertUnwindSafe(handler.handle_message(msg, ctx))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => Err(HandlerError::Panicked {
            info: panic_message(&*panic),
        }),
    };
    ctx.record(msg.id, res.clone());
    (msg.id, res)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
