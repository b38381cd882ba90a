//! Runtime core: configuration, dispatch and lifecycle.
//!
//! Public API: [`Pipeline`] (built through [`PipelineBuilder`]), [`Route`],
//! the configuration structs and the dispatcher state observers.
//!
//! Internal modules:
//! - [`runner`]: runs one batch with timeout, panic isolation and progress merge;
//! - [`dispatcher`]: per-queue poll → process → ack loop;
//! - [`pipeline`]: owns topic, dispatchers and observers, handles shutdown;
//! - [`shutdown`]: cross-platform termination signals.

mod builder;
mod config;
mod dispatcher;
mod pipeline;
mod runner;
mod shutdown;

pub use builder::{PipelineBuilder, Route};
pub use config::{DispatcherConfig, PipelineConfig, QueuePolicy};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherState};
pub use pipeline::Pipeline;
