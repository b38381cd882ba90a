//! # Observers of runtime events.
//!
//! Not to be confused with the topic's subscriber *queues*: these receive the
//! runtime [`Event`](crate::Event)s (dead letters, publish failures, timeouts,
//! shutdown progress) for logging, metrics or alerting.
//!
//! ```text
//! Topic / Dispatchers ── publish(Event) ──► Bus ──► Pipeline listener ──► SubscriberSet::emit
//!                                                                  ┌─────────┼─────────┐
//!                                                                  ▼         ▼         ▼
//!                                                              LogWriter  Counters   custom
//! ```
//!
//! ## Built-in observers
//! - [`LogWriter`] structured `tracing` record per event
//! - [`Counters`] per-queue counters for diagnostics and tests

mod counters;
mod log;
mod set;
mod subscribe;

pub use counters::{Counters, QueueCounters};
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
