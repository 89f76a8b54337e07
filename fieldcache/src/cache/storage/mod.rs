//! Storage backends
//!
//! The orchestrator only sees [`StorageBackend`]. Which implementation sits
//! behind it is decided by [`StorageConfig`]:
//!
//! - [`MemoryStore`]: bounded in-process LRU store
//! - [`RemoteStore`]: redis, TTL enforced by the server, tags tracked
//!   server-side so purges reach every process sharing the endpoint

mod memory;
mod remote;

pub use memory::{start_auto_cleanup, MemoryStats, MemoryStore};
pub use remote::RemoteStore;

use crate::cache::config::{CacheConfig, StorageConfig};
use crate::cache::entry::CacheEntry;
use crate::cache::invalidation::InvalidationReason;
use crate::cache::types::{CacheKey, Tag};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tracing::info;

/// Key/value capabilities the cache needs from a store
///
/// Every call may suspend on I/O and may fail. Implementations must be safe
/// to share between tasks and must not hold locks across `.await`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Fetch a live value; expired entries are reported as absent
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store an entry, replacing any previous entry under the same key
    async fn set(&self, entry: CacheEntry) -> Result<()>;

    /// Remove a key; returns whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove several keys; returns how many were present
    async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize>;

    /// Remove every entry this store owns
    async fn clear(&self) -> Result<()> {
        Err(CacheError::Other(format!(
            "{} store does not support clear",
            self.kind()
        )))
    }

    /// Subscribe to entries leaving the store on their own (expiry, eviction)
    fn watch_evictions(&self, _listener: Weak<dyn EvictionListener>) {}

    /// Whether `set` records the entry's tags in the store itself
    ///
    /// Such stores are purged through [`StorageBackend::invalidate_tag`],
    /// and the in-process index keeps no links for them.
    fn tracks_tags(&self) -> bool {
        false
    }

    /// Delete every entry recorded under `tag`; returns how many were present
    async fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        Err(CacheError::Other(format!(
            "{} store does not track tags (purging {})",
            self.kind(),
            tag
        )))
    }
}

/// Receives entries removed by the store itself
///
/// Stores may deliver notices while holding internal locks, so a listener
/// must return quickly and must not call back into the store.
pub trait EvictionListener: Send + Sync {
    fn on_evicted(&self, key: &str, tags: &BTreeSet<Tag>, reason: InvalidationReason);
}

/// Build the backend selected by the configuration
///
/// For the memory store this also starts the background sweeper when
/// `enable_auto_cleanup` is set, so it must run inside a tokio runtime.
pub async fn connect(config: &CacheConfig) -> Result<Arc<dyn StorageBackend>> {
    match &config.storage {
        StorageConfig::Memory(options) => {
            let store = Arc::new(MemoryStore::new(options.max_entries));
            if config.enable_auto_cleanup {
                tokio::spawn(start_auto_cleanup(
                    Arc::downgrade(&store),
                    config.cleanup_interval(),
                ));
            }
            Ok(store)
        }
        StorageConfig::Remote(options) => {
            let store = RemoteStore::connect(options).await?;
            info!("Remote cache store ready at {}", store.endpoint());
            Ok(Arc::new(store))
        }
    }
}
