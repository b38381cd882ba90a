//! # Closure-backed message handler (`HandlerFn`)
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Message, CancellationToken) -> Fut`,
//! producing a fresh future per message. The closure receives its own copy of
//! the message; shared state goes into an explicit `Arc` captured by the closure.
//!
//! ## Example
//! ```rust
//! use fanvisor::{HandlerError, HandlerFn, HandlerRef, Message};
//! use tokio_util::sync::CancellationToken;
//!
//! let h: HandlerRef = HandlerFn::arc("audit", |msg: Message, _ctx: CancellationToken| async move {
//!     if msg.event.key.is_empty() {
//!         return Err(HandlerError::failed("empty key"));
//!     }
//!     Ok(())
//! });
//!
//! assert_eq!(h.name(), "audit");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::Message;
use crate::error::HandlerError;
use crate::handlers::handler::{BatchContext, HandlerRef};
use crate::handlers::per_message::{MessageHandler, PerMessage};

/// Function-backed [`MessageHandler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    /// Builds a batch handler (wrapped in [`PerMessage`]) ready for a route.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> HandlerRef {
        Arc::new(PerMessage::new(Self::new(name, f)))
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_message(
        &self,
        message: &Message,
        ctx: &BatchContext,
    ) -> Result<(), HandlerError> {
        (self.f)(message.clone(), ctx.token().clone()).await
    }
}
