//! # Run one batch through a handler.
//!
//! Invokes the handler once with a fresh [`BatchContext`], under the per-batch
//! timeout, and resolves a result for **every** message of the batch.
//!
//! ## Resolution order per message
//! ```text
//! outcome returned by the handler
//!   └─ else result recorded in ctx.progress (survives timeout/panic)
//!        └─ else: timeout  → HandlerError::Timeout
//!                 panic    → HandlerError::Panicked
//!                 returned → HandlerError::Failed("no outcome reported")
//! ```
//!
//! ## Rules
//! - The handler gets a token derived from `abandon`, not from the stop
//!   signal: a graceful stop lets the batch finish.
//! - On timeout the token is cancelled and the handler future is dropped;
//!   nothing from this batch is acknowledged after that point except what was
//!   already recorded.
//! - A panic of the whole handler is caught here; it never reaches the dispatcher.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::broker::{Batch, MessageId};
use crate::core::DispatcherConfig;
use crate::error::{HandlerError, PipelineError};
use crate::events::{Bus, Event, EventKind};
use crate::handlers::{BatchContext, BatchOutcome, Handler, panic_message};

enum Ended {
    Returned(BatchOutcome),
    Panicked(String),
    TimedOut,
}

/// Processes `batch` and returns one result per message id.
pub(crate) async fn process_batch(
    handler: &dyn Handler,
    batch: &Batch,
    queue: &str,
    cfg: &DispatcherConfig,
    abandon: &CancellationToken,
    bus: &Bus,
) -> HashMap<MessageId, Result<(), HandlerError>> {
    let token = abandon.child_token();
    let ctx = BatchContext::new(token.clone(), cfg.concurrency_limit());
    let call = AssertUnwindSafe(handler.handle_batch(batch, &ctx)).catch_unwind();

    let ended = match cfg.batch_timeout() {
        Some(dur) => match time::timeout(dur, call).await {
            Ok(Ok(out)) => Ended::Returned(out),
            Ok(Err(panic)) => Ended::Panicked(panic_message(&*panic)),
            Err(_elapsed) => {
                token.cancel();
                Ended::TimedOut
            }
        },
        None => match call.await {
            Ok(out) => Ended::Returned(out),
            Err(panic) => Ended::Panicked(panic_message(&*panic)),
        },
    };

    let progress = ctx.progress();
    let (mut returned, fallback) = match ended {
        Ended::Returned(out) => (out.into_map(), HandlerError::failed("no outcome reported")),
        Ended::Panicked(info) => {
            warn!(queue, handler = handler.name(), %info, "handler panicked");
            (HashMap::new(), HandlerError::Panicked { info })
        }
        Ended::TimedOut => {
            let timeout = cfg.processing_timeout;
            let pending = batch
                .messages
                .iter()
                .filter(|m| progress.get(&m.id).is_none())
                .count();
            let err = PipelineError::HandlerTimeout {
                queue: queue.to_string(),
                timeout,
                pending,
            };
            warn!(queue, handler = handler.name(), error = %err, "batch deadline elapsed");
            bus.publish(
                Event::new(EventKind::HandlerTimeout)
                    .with_queue(queue)
                    .with_timeout(timeout)
                    .with_batch_size(pending),
            );
            (HashMap::new(), HandlerError::Timeout { timeout })
        }
    };

    batch
        .messages
        .iter()
        .map(|m| {
            let res = returned
                .remove(&m.id)
                .or_else(|| progress.get(&m.id).cloned())
                .unwrap_or_else(|| Err(fallback.clone()));
            (m.id, res)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::broker::{Message, ObjectEvent};

    /// Succeeds on "ok*", fails on "fail*", sleeps forever on "slow*", panics on "panic*".
    struct Scripted;

    #[async_trait]
    impl Handler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle_batch(&self, batch: &Batch, ctx: &BatchContext) -> BatchOutcome {
            let mut out = BatchOutcome::default();
            for m in batch {
                let key = m.event.key.as_str();
                if key.starts_with("slow") {
                    std::future::pending::<()>().await;
                }
                if key.starts_with("panic") {
                    panic!("bad batch");
                }
                let res = if key.starts_with("ok") {
                    Ok(())
                } else {
                    Err(HandlerError::failed(key))
                };
                ctx.record(m.id, res.clone());
                out.insert(m.id, res);
            }
            out
        }
    }

    /// Returns an empty outcome regardless of input.
    struct Silent;

    #[async_trait]
    impl Handler for Silent {
        fn name(&self) -> &str {
            "silent"
        }
        async fn handle_batch(&self, _batch: &Batch, _ctx: &BatchContext) -> BatchOutcome {
            BatchOutcome::default()
        }
    }

    fn batch(keys: &[&str]) -> Batch {
        Batch::new(
            keys.iter()
                .map(|k| Message::new(ObjectEvent::new("images", *k, 1)))
                .collect(),
        )
    }

    async fn run(
        handler: &dyn Handler,
        batch: &Batch,
        timeout: Duration,
        bus: &Bus,
    ) -> HashMap<MessageId, Result<(), HandlerError>> {
        let cfg = DispatcherConfig {
            processing_timeout: timeout,
            ..DispatcherConfig::default()
        };
        process_batch(handler, batch, "q", &cfg, &CancellationToken::new(), bus).await
    }

    #[tokio::test]
    async fn mixed_outcomes_are_kept_per_message() {
        let b = batch(&["ok-1", "fail-2", "ok-3"]);
        let out = run(&Scripted, &b, Duration::ZERO, &Bus::new(4)).await;

        assert_eq!(out[&b.messages[0].id], Ok(()));
        assert!(out[&b.messages[1].id].is_err());
        assert_eq!(out[&b.messages[2].id], Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_finished_work_and_fails_pending() {
        let bus = Bus::new(4);
        let mut rx = bus.subscribe();
        let b = batch(&["ok-1", "slow-2", "ok-3"]);
        let out = run(&Scripted, &b, Duration::from_secs(15), &bus).await;

        assert_eq!(out[&b.messages[0].id], Ok(()));
        assert_eq!(
            out[&b.messages[1].id],
            Err(HandlerError::Timeout { timeout: Duration::from_secs(15) })
        );
        assert!(out[&b.messages[2].id].is_err());

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::HandlerTimeout);
        assert_eq!(ev.batch_size, Some(2));
    }

    #[tokio::test]
    async fn whole_batch_panic_becomes_failures() {
        let b = batch(&["ok-1", "panic-2"]);
        let out = run(&Scripted, &b, Duration::from_secs(1), &Bus::new(4)).await;

        assert_eq!(out[&b.messages[0].id], Ok(()));
        assert!(matches!(out[&b.messages[1].id], Err(HandlerError::Panicked { .. })));
    }

    #[tokio::test]
    async fn missing_outcomes_count_as_failures() {
        let b = batch(&["ok-1", "ok-2"]);
        let out = run(&Silent, &b, Duration::ZERO, &Bus::new(4)).await;
        assert_eq!(out.len(), 2);
        assert!(out.values().all(|r| r.is_err()));
    }
}
