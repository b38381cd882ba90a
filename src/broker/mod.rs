//! In-process broker: event/message model, the queue contract, the
//! [`MemoryQueue`] backend and the fan-out [`Topic`].

mod memory;
mod message;
mod queue;
mod topic;

pub use memory::{MemoryQueue, QueueStats};
pub use message::{Batch, Message, MessageId, ObjectEvent};
pub use queue::{Queue, QueueRef};
pub use topic::{PublishReport, Topic};
