//! # Object store access.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Minimal object store interface used by handlers.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Reads the whole object.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Creates or replaces an object.
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
}

/// In-process object store.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A store that rejects every write.
    pub fn read_only() -> Self {
        Self {
            objects: RwLock::default(),
            read_only: true,
        }
    }

    /// Seeds an object regardless of the read-only flag.
    pub async fn put(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.into(), bytes.into());
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Sorted list of stored keys.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::Io {
                key: key.to_string(),
                reason: "store is read-only".into(),
            });
        }
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }
}
