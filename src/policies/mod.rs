//! Retry and backoff policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve between attempts (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid thundering herd
//! - [`RetryPolicy`]   bounded attempts for one subscriber delivery during publish
//!
//! ## Where they are used
//! ```text
//! Topic::publish ──► per-subscriber enqueue
//!                      └─► RetryPolicy { attempts, backoff } (independent per subscriber)
//!
//! Dispatcher polling ──► Queue::receive fails (QueueUnavailable)
//!                          └─► poll_backoff.next(consecutive_failures) then poll again
//! ```
//!
//! Message redelivery is **not** driven from here: it belongs to the queue's
//! visibility timeout and receive limit ([`QueuePolicy`](crate::QueuePolicy)).

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
