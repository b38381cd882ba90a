//! Runtime events: types and broadcast bus.
//!
//! Everything the pipeline wants an operator to see (dead letters, partial
//! publish failures, timeouts, unavailable queues, shutdown progress) is
//! published here as an [`Event`] and fanned out to observers by
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contents
//! - [`EventKind`], [`Event`] classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Topic`, `Dispatcher`, `runner::process_batch`, `Pipeline`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Pipeline`'s observer listener (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
