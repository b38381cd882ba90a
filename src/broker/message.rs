//! # Messages and batches.
//!
//! An [`ObjectEvent`] describes one stored object. The topic copies it into one
//! [`Message`] per subscriber queue; the queue hands messages out in [`Batch`]es.
//!
//! ```text
//! ObjectEvent ──(copy per subscriber)──► Message { id, event, receive_count, .. }
//!                                              │
//!                              Queue::receive ─┴─► Batch { messages, dead_lettered }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Immutable description of one object creation.
///
/// # Example
/// ```
/// use fanvisor::ObjectEvent;
///
/// let ev = ObjectEvent::new("images", "cats/tabby.png", 2048)
///     .with_content_type("image/png")
///     .with_metadata("uploader", "alice");
///
/// assert_eq!(ev.key, "cats/tabby.png");
/// assert_eq!(ev.content_type.as_deref(), Some("image/png"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEvent {
    /// Source identifier (bucket or store name).
    pub source: String,
    /// Object key within the source.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// MIME type, if the source knows it.
    pub content_type: Option<String>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Free-form content metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectEvent {
    /// Creates an event stamped with the current time.
    pub fn new(source: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            size,
            content_type: None,
            created_at: SystemTime::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the content type.
    #[inline]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Adds one metadata entry.
    #[inline]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Overrides the creation timestamp.
    #[inline]
    pub fn with_created_at(mut self, at: SystemTime) -> Self {
        self.created_at = at;
        self
    }
}

/// Unique message identifier (time-ordered UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queue-resident wrapper around an [`ObjectEvent`] plus delivery metadata.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique id within the queue.
    pub id: MessageId,
    /// The event copy owned by this message.
    pub event: ObjectEvent,
    /// Number of times this message has been handed to a receiver.
    pub receive_count: u32,
    /// When the queue accepted the message.
    pub enqueued_at: SystemTime,
    /// Visibility deadline while in flight (`None` = visible).
    pub visible_at: Option<Instant>,
}

impl Message {
    /// Wraps an event into a fresh, never-delivered message.
    pub fn new(event: ObjectEvent) -> Self {
        Self {
            id: MessageId::new(),
            event,
            receive_count: 0,
            enqueued_at: SystemTime::now(),
            visible_at: None,
        }
    }

    /// True if this is a redelivery.
    #[inline]
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Messages returned by one receive call.
///
/// `dead_lettered` lists messages the queue moved to its dead-letter path while
/// serving the call; they are reported, never processed.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub messages: Vec<Message>,
    pub dead_lettered: Vec<Message>,
}

impl Batch {
    /// Creates a batch from received messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            dead_lettered: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ids of the messages in batch order.
    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }

    /// Appends the contents of another receive into this one.
    pub(crate) fn absorb(&mut self, other: Batch) {
        self.messages.extend(other.messages);
        self.dead_lettered.extend(other.dead_lettered);
    }

    pub(crate) fn take_dead_lettered(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.dead_lettered)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
