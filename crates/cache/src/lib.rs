#![warn(clippy::unwrap_used)]

//! Last-known-good payload cache validated by content checksum and age.

pub mod checksum;
pub mod file;
pub mod integrity;
pub mod local;
pub mod store;
pub mod tiered;

pub use checksum::checksum;
pub use file::FileStore;
pub use integrity::{CacheEntry, IntegrityCache};
pub use local::MemoryStore;
pub use store::{CacheStore, StorageError};
pub use tiered::TieredStore;
