//! # Backup / replication handler.
//!
//! Copies each referenced object from a source store into a destination store
//! under `prefix + key`. Copies are idempotent overwrites, so redelivery after
//! a partial failure is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::broker::Message;
use crate::error::{HandlerError, StoreError};
use crate::external::ObjectStore;
use crate::handlers::handler::BatchContext;
use crate::handlers::per_message::MessageHandler;

/// Mirrors uploaded objects into another store.
pub struct BackupReplicator {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    prefix: String,
}

impl BackupReplicator {
    pub fn new(source: Arc<dyn ObjectStore>, destination: Arc<dyn ObjectStore>) -> Self {
        Self {
            source,
            destination,
            prefix: "backup/".into(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

#[async_trait]
impl MessageHandler for BackupReplicator {
    fn name(&self) -> &str {
        "backup-replicator"
    }

    async fn handle_message(
        &self,
        message: &Message,
        _ctx: &BatchContext,
    ) -> Result<(), HandlerError> {
        let key = &message.event.key;
        let bytes = self.source.read(key).await.map_err(|e| match e {
            StoreError::NotFound { key } => HandlerError::ObjectMissing { key },
            other => HandlerError::failed(format!("source unreadable: {other}")),
        })?;

        let target = format!("{}{}", self.prefix, key);
        let size = bytes.len();
        self.destination
            .write(&target, bytes)
            .await
            .map_err(|e| HandlerError::Write {
                key: target.clone(),
                error: e.to_string(),
            })?;

        debug!(key = %key, target = %target, size, "object replicated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::broker::ObjectEvent;
    use crate::external::MemoryStore;

    fn ctx() -> BatchContext {
        BatchContext::new(CancellationToken::new(), None)
    }

    #[tokio::test]
    async fn copies_under_prefix() {
        let src = MemoryStore::arc();
        let dst = MemoryStore::arc();
        src.put("cat.png", b"meow".to_vec()).await;

        let h = BackupReplicator::new(src, dst.clone()).with_prefix("mirror/");
        let m = Message::new(ObjectEvent::new("images", "cat.png", 4));
        h.handle_message(&m, &ctx()).await.unwrap();

        assert_eq!(dst.read("mirror/cat.png").await.unwrap(), b"meow");
    }

    #[tokio::test]
    async fn destination_failure_is_reported() {
        let src = MemoryStore::arc();
        src.put("cat.png", b"meow".to_vec()).await;
        let h = BackupReplicator::new(src, Arc::new(MemoryStore::read_only()));

        let m = Message::new(ObjectEvent::new("images", "cat.png", 4));
        let err = h.handle_message(&m, &ctx()).await.unwrap_err();
        assert_eq!(err.as_label(), "write_failed");
    }
}
