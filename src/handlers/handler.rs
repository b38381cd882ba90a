//! # Batch handler capability.
//!
//! A [`Handler`] turns one [`Batch`] into a [`BatchOutcome`]: one result per
//! message. The dispatcher acknowledges every success and leaves every failure
//! to the queue's redelivery, so partial batch failure is an ordinary outcome.
//!
//! Handlers that work message by message should implement
//! [`MessageHandler`](crate::MessageHandler) and be wrapped in
//! [`PerMessage`](crate::PerMessage) instead.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use fanvisor::{Batch, BatchContext, BatchOutcome, Handler};
//!
//! struct AcceptAll;
//!
//! #[async_trait]
//! impl Handler for AcceptAll {
//!     fn name(&self) -> &str { "accept-all" }
//!
//!     async fn handle_batch(&self, batch: &Batch, _ctx: &BatchContext) -> BatchOutcome {
//!         let mut out = BatchOutcome::default();
//!         for msg in batch {
//!             out.insert(msg.id, Ok(()));
//!         }
//!         out
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::{Batch, MessageId};
use crate::error::HandlerError;

/// Per-message results of one batch.
///
/// A message of the batch without an entry counts as failed.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    results: HashMap<MessageId, Result<(), HandlerError>>,
}

impl BatchOutcome {
    /// Records the result of one message, replacing any earlier one.
    pub fn insert(&mut self, id: MessageId, result: Result<(), HandlerError>) {
        self.results.insert(id, result);
    }

    /// Result for `id`, if one was recorded.
    pub fn get(&self, id: &MessageId) -> Option<&Result<(), HandlerError>> {
        self.results.get(id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Ids recorded as successful.
    pub fn succeeded(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(id, _)| *id)
    }

    pub(crate) fn into_map(self) -> HashMap<MessageId, Result<(), HandlerError>> {
        self.results
    }
}

impl FromIterator<(MessageId, Result<(), HandlerError>)> for BatchOutcome {
    fn from_iter<I: IntoIterator<Item = (MessageId, Result<(), HandlerError>)>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

impl Extend<(MessageId, Result<(), HandlerError>)> for BatchOutcome {
    fn extend<I: IntoIterator<Item = (MessageId, Result<(), HandlerError>)>>(&mut self, iter: I) {
        self.results.extend(iter);
    }
}

/// Execution context handed to a handler for one batch.
///
/// - `token` is cancelled when the batch deadline elapses or the pipeline
///   abandons in-flight work; long operations should select on it.
/// - [`BatchContext::record`] stores a result as soon as it is known, so work
///   finished before a timeout is still acknowledged.
#[derive(Clone)]
pub struct BatchContext {
    token: CancellationToken,
    concurrency: Option<usize>,
    progress: Arc<Mutex<BatchOutcome>>,
}

impl BatchContext {
    /// Creates a context; `concurrency = None` means unlimited.
    pub fn new(token: CancellationToken, concurrency: Option<usize>) -> Self {
        Self {
            token,
            concurrency,
            progress: Arc::new(Mutex::new(BatchOutcome::default())),
        }
    }

    /// Cancellation token for this batch.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// In-batch concurrency limit (`None` = unlimited).
    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    /// Records one message result.
    pub fn record(&self, id: MessageId, result: Result<(), HandlerError>) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, result);
    }

    /// Results recorded so far.
    pub fn progress(&self) -> BatchOutcome {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Processes a batch and reports one outcome per message.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Stable handler name (for logs/events).
    fn name(&self) -> &str;

    /// Handles all messages of `batch`.
    ///
    /// Must not assume exclusive delivery: the same message may arrive again
    /// after a failure, a timeout or a crash.
    async fn handle_batch(&self, batch: &Batch, ctx: &BatchContext) -> BatchOutcome;
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;
