//! # Consumer handlers.
//!
//! - [`Handler`]: the capability the dispatcher depends on (batch in, per-message outcomes out)
//! - [`MessageHandler`] + [`PerMessage`]: one-message-at-a-time handlers with bounded in-batch concurrency
//! - [`HandlerFn`]: closure-backed message handler
//! - [`ImageProcessor`], [`BackupReplicator`], [`Mailer`]: the pipeline's concrete variants
//!
//! New variants plug in without touching the topic, queues or dispatchers.

mod backup;
mod handler;
mod handler_fn;
mod image;
mod mailer;
mod per_message;

pub use backup::BackupReplicator;
pub use handler::{BatchContext, BatchOutcome, Handler, HandlerRef};
pub use handler_fn::HandlerFn;
pub use image::{ImageFormat, ImageProcessor, Transform};
pub use mailer::Mailer;
pub use per_message::{MessageHandler, PerMessage};

pub(crate) use per_message::panic_message;
