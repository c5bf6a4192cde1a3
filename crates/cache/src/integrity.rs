//! Integrity-checked cache of parsed payloads.
//!
//! An entry is served only when its checksum matches the raw payload the
//! caller just fetched and it is younger than the TTL. Anything else is a
//! miss and the entry is evicted. Storage failures are logged and reported
//! as misses; the cache never fails a load.

use crate::checksum::checksum;
use crate::store::{CacheStore, StorageError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: Vec<T>,
    /// RFC 3339 in storage, so entries stay human-inspectable.
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub source_identifier: String,
    pub record_count: usize,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = self.age(now);
        // Entries stamped in the future are as untrustworthy as stale ones
        match age.to_std() {
            Ok(age) => age < ttl,
            Err(_) => false,
        }
    }

    fn is_consistent(&self) -> bool {
        self.payload.len() == self.record_count && self.checksum.len() == 8
    }
}

/// Borrowed twin of [`CacheEntry`] so storing does not clone the payload.
#[derive(Serialize)]
struct EntryRef<'a, T> {
    payload: &'a [T],
    timestamp: DateTime<Utc>,
    checksum: String,
    source_identifier: String,
    record_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissReason {
    Absent,
    Unreadable,
    Corrupt,
    Expired,
    ChecksumMismatch,
}

impl MissReason {
    fn as_str(&self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::Unreadable => "unreadable",
            MissReason::Corrupt => "corrupt",
            MissReason::Expired => "expired",
            MissReason::ChecksumMismatch => "checksum_mismatch",
        }
    }
}

pub struct IntegrityCache<S> {
    store: S,
    ttl: Duration,
}

impl<S: CacheStore> IntegrityCache<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store_backend(&self) -> &S {
        &self.store
    }

    /// Persist `payload` as the last-known-good parse of `raw_text`.
    /// Returns the checksum written, or `None` if storage failed.
    pub async fn store<T: Serialize>(
        &self,
        key: &str,
        raw_text: &str,
        payload: &[T],
        source_identifier: &str,
    ) -> Option<String> {
        let sum = checksum(raw_text);
        let entry = EntryRef {
            payload,
            timestamp: Utc::now(),
            checksum: sum.clone(),
            source_identifier: source_identifier.to_string(),
            record_count: payload.len(),
        };

        let result = match serde_json::to_string(&entry) {
            Ok(json) => self.store.put(key, &json).await,
            Err(e) => Err(StorageError::from(e)),
        };

        match result {
            Ok(()) => {
                info!(key, checksum = %sum, records = payload.len(), "Cached payload");
                Some(sum)
            }
            Err(e) => {
                metrics::counter!("cache.write_errors").increment(1);
                warn!(key, backend = self.store.name(), error = %e, "Cache write failed");
                None
            }
        }
    }

    /// Payload for `key` if it was cached from text with this checksum and
    /// is still within the TTL.
    pub async fn retrieve<T: DeserializeOwned>(&self, key: &str, expected_checksum: &str) -> Option<Vec<T>> {
        match self.load_valid::<T>(key).await {
            Ok(entry) if entry.checksum == expected_checksum => {
                metrics::counter!("cache.hit").increment(1);
                debug!(key, checksum = expected_checksum, "Cache hit");
                Some(entry.payload)
            }
            Ok(_) => {
                self.miss(key, MissReason::ChecksumMismatch, true).await;
                None
            }
            Err(reason) => {
                self.miss(key, reason, reason != MissReason::Absent).await;
                None
            }
        }
    }

    /// Most recent entry still within the TTL, whatever payload it was cached
    /// from. Used for optimistic first paint and as the fallback when every
    /// fetch attempt failed.
    pub async fn latest<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        match self.load_valid::<T>(key).await {
            Ok(entry) => {
                metrics::counter!("cache.hit").increment(1);
                Some(entry)
            }
            Err(reason) => {
                self.miss(key, reason, reason != MissReason::Absent).await;
                None
            }
        }
    }

    pub async fn evict(&self, key: &str) {
        match self.store.remove(key).await {
            Ok(()) => {
                metrics::counter!("cache.evicted").increment(1);
            }
            Err(e) => warn!(key, error = %e, "Cache eviction failed"),
        }
    }

    async fn load_valid<T: DeserializeOwned>(&self, key: &str) -> Result<CacheEntry<T>, MissReason> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(MissReason::Absent),
            Err(e) => {
                warn!(key, backend = self.store.name(), error = %e, "Cache read failed");
                return Err(MissReason::Unreadable);
            }
        };

        let entry: CacheEntry<T> = serde_json::from_str(&raw).map_err(|_| MissReason::Corrupt)?;
        if !entry.is_consistent() {
            return Err(MissReason::Corrupt);
        }
        if !entry.is_fresh(Utc::now(), self.ttl) {
            return Err(MissReason::Expired);
        }
        Ok(entry)
    }

    async fn miss(&self, key: &str, reason: MissReason, evict: bool) {
        metrics::counter!("cache.miss").increment(1);
        debug!(key, reason = reason.as_str(), "Cache miss");
        if evict && reason != MissReason::Unreadable {
            self.evict(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryStore;
    use insights_core::Record;

    const RAW: &str = "day,ad_name,spend\n2024-01-01,A,100\n";

    fn records() -> Vec<Record> {
        vec![Record {
            day: "2024-01-01".to_string(),
            ad_name: "A".to_string(),
            spend: 100.0,
            ..Default::default()
        }]
    }

    fn cache(ttl_secs: u64) -> IntegrityCache<MemoryStore> {
        IntegrityCache::new(MemoryStore::new(1 << 20), Duration::from_secs(ttl_secs))
    }

    #[tokio::test]
    async fn test_hit_on_matching_checksum() {
        let cache = cache(600);
        let sum = cache.store("k", RAW, &records(), "upload").await.unwrap();
        assert_eq!(sum, checksum(RAW));

        let hit: Vec<Record> = cache.retrieve("k", &sum).await.unwrap();
        assert_eq!(hit, records());

        let latest: CacheEntry<Record> = cache.latest("k").await.unwrap();
        assert_eq!(latest.source_identifier, "upload");
        assert_eq!(latest.record_count, 1);
    }

    #[tokio::test]
    async fn test_empty_cache_is_a_miss() {
        let cache = cache(600);
        assert!(cache.retrieve::<Record>("k", "00000000").await.is_none());
        assert!(cache.latest::<Record>("k").await.is_none());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_evicts() {
        let cache = cache(600);
        cache.store("k", RAW, &records(), "upload").await.unwrap();

        let other = checksum("day,ad_name,spend\n2024-01-01,A,999\n");
        assert!(cache.retrieve::<Record>("k", &other).await.is_none());
        assert!(cache.store_backend().is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_is_never_served() {
        let cache = cache(0);
        let sum = cache.store("k", RAW, &records(), "upload").await.unwrap();
        assert!(cache.retrieve::<Record>("k", &sum).await.is_none());
        assert!(cache.latest::<Record>("k").await.is_none());
        assert!(cache.store_backend().is_empty());
    }

    #[tokio::test]
    async fn test_stale_timestamp_is_expired() {
        let cache = cache(600);
        let entry = CacheEntry {
            payload: records(),
            timestamp: Utc::now() - chrono::Duration::minutes(11),
            checksum: checksum(RAW),
            source_identifier: "sheet".to_string(),
            record_count: 1,
        };
        let json = serde_json::to_string(&entry).unwrap();
        cache.store_backend().put("k", &json).await.unwrap();

        assert!(cache.retrieve::<Record>("k", &checksum(RAW)).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entries_are_misses() {
        let cache = cache(600);
        cache.store_backend().put("k", "{not json").await.unwrap();
        assert!(cache.latest::<Record>("k").await.is_none());

        // Truncated payload: record_count disagrees
        let entry = CacheEntry {
            payload: records(),
            timestamp: Utc::now(),
            checksum: checksum(RAW),
            source_identifier: "sheet".to_string(),
            record_count: 5,
        };
        let json = serde_json::to_string(&entry).unwrap();
        cache.store_backend().put("k", &json).await.unwrap();
        assert!(cache.retrieve::<Record>("k", &checksum(RAW)).await.is_none());
        assert!(cache.store_backend().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let cache = IntegrityCache::new(MemoryStore::new(8), Duration::from_secs(600));
        assert!(cache.store("k", RAW, &records(), "upload").await.is_none());
        assert!(cache.latest::<Record>("k").await.is_none());
    }
}
