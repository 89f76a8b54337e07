//! Bounded in-process store with LRU eviction

use super::{EvictionListener, StorageBackend};
use crate::cache::entry::CacheEntry;
use crate::cache::invalidation::InvalidationReason;
use crate::cache::types::CacheKey;
use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// In-process store holding at most `max_entries` entries
///
/// The LRU order is updated on every hit. When a new key arrives at full
/// capacity, the least recently used entry is evicted even if it has not
/// expired yet. Expired entries are dropped when read or swept.
pub struct MemoryStore {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    listener: OnceLock<Weak<dyn EvictionListener>>,
    evictions_lru: AtomicU64,
    evictions_ttl: AtomicU64,
}

/// Occupancy and eviction counters of a [`MemoryStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Number of entries currently held
    pub entries: usize,

    /// Configured capacity
    pub capacity: usize,

    /// Entries evicted to make room
    pub evictions_lru: u64,

    /// Entries dropped after their deadline
    pub evictions_ttl: u64,
}

impl MemoryStore {
    /// Create a store; a capacity of zero is treated as one
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        info!("Initializing memory cache store (capacity: {})", capacity);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            listener: OnceLock::new(),
            evictions_lru: AtomicU64::new(0),
            evictions_ttl: AtomicU64::new(0),
        }
    }

    /// Get number of entries in the store, expired ones included
    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock("capacity").cap().get()
    }

    /// Check presence without touching the LRU order
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock("contains_key").contains(key)
    }

    pub fn stats(&self) -> MemoryStats {
        let entries = self.lock("stats");
        MemoryStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            evictions_lru: self.evictions_lru.load(Ordering::Relaxed),
            evictions_ttl: self.evictions_ttl.load(Ordering::Relaxed),
        }
    }

    /// Remove all expired entries
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock("purge_expired");
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        let mut count = 0;
        for key in &keys {
            if let Some(entry) = entries.pop(key) {
                self.notify(&entry, InvalidationReason::Expired);
                count += 1;
            }
        }
        drop(entries);

        if count > 0 {
            self.evictions_ttl.fetch_add(count as u64, Ordering::Relaxed);
            debug!("Cleaned up {} expired entries", count);
        }
        count
    }

    /// Must be called with the entries lock held, so a notice for an
    /// evicted entry lands before any later store of the same key
    fn notify(&self, entry: &CacheEntry, reason: InvalidationReason) {
        if let Some(listener) = self.listener.get().and_then(Weak::upgrade) {
            listener.on_evicted(&entry.key, &entry.tags, reason);
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(op, "Recovered from poisoned memory store lock");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.lock("get");
        let lookup = entries
            .get(key)
            .map(|entry| (!entry.is_expired()).then(|| entry.value.clone()));

        match lookup {
            None => Ok(None),
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                if let Some(entry) = entries.pop(key) {
                    debug!("Cache entry expired: {}", key);
                    self.evictions_ttl.fetch_add(1, Ordering::Relaxed);
                    self.notify(&entry, InvalidationReason::Expired);
                }
                Ok(None)
            }
        }
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let key = entry.key.clone();
        let mut entries = self.lock("set");

        // `push` hands back the old value for the same key, or the LRU victim
        if let Some((evicted_key, evicted)) = entries.push(key.clone(), entry) {
            if evicted_key != key {
                debug!("Evicting entry due to max_entries limit: {}", evicted_key);
                self.evictions_lru.fetch_add(1, Ordering::Relaxed);
                self.notify(&evicted, InvalidationReason::LeastRecentlyUsed);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock("delete").pop(key).is_some())
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize> {
        let mut entries = self.lock("delete_many");
        Ok(keys
            .iter()
            .filter(|key| entries.pop(key.as_str()).is_some())
            .count())
    }

    /// Drop every entry without notifying the listener
    async fn clear(&self) -> Result<()> {
        let mut entries = self.lock("clear");
        let count = entries.len();
        entries.clear();
        info!("Cleared {} entries from memory store", count);
        Ok(())
    }

    fn watch_evictions(&self, listener: Weak<dyn EvictionListener>) {
        if self.listener.set(listener).is_err() {
            warn!("Memory store already has an eviction listener; ignoring the new one");
        }
    }
}

/// Background task for automatic removal of expired entries
///
/// Ends once the store has been dropped.
pub async fn start_auto_cleanup(store: Weak<MemoryStore>, interval: Duration) {
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let Some(store) = store.upgrade() else {
            debug!("Memory store dropped, stopping cleanup task");
            break;
        };

        let purged = store.purge_expired();
        if purged > 0 {
            debug!("Auto cleanup: {} expired entries", purged);
        }
    }
}
