//! In-process key-value tier backed by DashMap, with a byte quota.
//! Serves as the fast tier in front of the durable file store.

use crate::store::{CacheStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Fast cache tier. Writes that would push usage past the quota are
/// rejected with [`StorageError::QuotaExceeded`] so the caller can fall back.
pub struct MemoryStore {
    store: Arc<DashMap<String, String>>,
    quota_bytes: usize,
}

impl MemoryStore {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            quota_bytes,
        }
    }

    /// Bytes used by keys and values.
    pub fn used_bytes(&self) -> usize {
        self.store.iter().map(|e| e.key().len() + e.value().len()).sum()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let replaced = self.store.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let used = self.used_bytes() - replaced;
        let needed = key.len() + value.len();
        if used + needed > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.quota_bytes.saturating_sub(used),
            });
        }
        self.store.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
