//! Two-tier store: fast tier first, durable tier when the fast one rejects.

use crate::store::{CacheStore, StorageError};
use async_trait::async_trait;
use tracing::{debug, warn};

pub struct TieredStore<F, D> {
    fast: F,
    durable: D,
    write_through: bool,
}

impl<F: CacheStore, D: CacheStore> TieredStore<F, D> {
    pub fn new(fast: F, durable: D) -> Self {
        Self {
            fast,
            durable,
            write_through: false,
        }
    }

    /// Also write to the durable tier when the fast tier accepted the
    /// write. Needed when the fast tier does not outlive the process.
    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    pub fn fast(&self) -> &F {
        &self.fast
    }

    pub fn durable(&self) -> &D {
        &self.durable
    }
}

#[async_trait]
impl<F: CacheStore, D: CacheStore> CacheStore for TieredStore<F, D> {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.fast.get(key).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => warn!(tier = self.fast.name(), error = %e, "Fast tier read failed"),
        }
        self.durable.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        match self.fast.put(key, value).await {
            Ok(()) => {
                if self.write_through {
                    self.durable.put(key, value).await?;
                } else if let Err(e) = self.durable.remove(key).await {
                    // A stale durable copy is harmless: reads hit the fast tier first
                    debug!(error = %e, "Could not clear durable copy");
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    tier = self.fast.name(),
                    fallback = self.durable.name(),
                    error = %e,
                    "Fast tier rejected write, falling back"
                );
                // The fast tier may still hold an older entry that would shadow this one
                self.fast.remove(key).await.ok();
                self.durable.put(key, value).await
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let fast = self.fast.remove(key).await;
        let durable = self.durable.remove(key).await;
        fast.and(durable)
    }

    fn name(&self) -> &'static str {
        "tiered"
    }
}
