//! Collaborators the handlers depend on.
//!
//! Only handlers touch these. Real deployments plug in a remote object store or
//! mail provider; the in-process [`MemoryStore`] and [`Outbox`] serve local
//! runs and tests.

mod notify;
mod store;

pub use notify::{Mail, Notifier, Outbox};
pub use store::{MemoryStore, ObjectStore};
