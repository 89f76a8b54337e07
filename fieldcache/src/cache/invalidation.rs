//! Tag-based cache invalidation
//!
//! Entries are registered under the tags computed by their read policy. A
//! write policy later names tags to purge; every key under such a tag is
//! deleted from storage. The index keeps both directions (tag to keys, key
//! to tags) so a purge through one tag also detaches the key from its other
//! tags, and entries leaving storage on their own can be unlinked.
//!
//! Storage that tracks tags itself (the remote store keeps tag sets next to
//! the entries) owns the links instead, so every process sharing it sees the
//! same purges. The index then only forwards purges.

use crate::cache::storage::{EvictionListener, StorageBackend};
use crate::cache::types::{CacheKey, Tag};
use crate::error::{CacheError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason an entry left the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Manual purge through the cache handle
    Manual,

    /// Evicted by LRU policy
    LeastRecentlyUsed,

    /// Invalidated by tag match
    TagMatch { tag: Tag },
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
        }
    }
}

/// Bidirectional tag registry bound to one storage backend
///
/// Register after a successful store. Updates for one key are serialized on
/// its key slot, and storage delivers eviction notices before a later store
/// of the same key returns, so a live entry keeps its links. Racing an
/// invalidation against a store of the same key can still leave a fresh
/// entry unindexed; it then lives until its TTL.
pub struct InvalidationIndex {
    /// Maps tags to every key stored under them
    tags: DashMap<Tag, HashSet<CacheKey>>,
    /// Maps keys to the tags they were registered with
    keys: DashMap<CacheKey, HashSet<Tag>>,
    storage: Arc<dyn StorageBackend>,
}

impl InvalidationIndex {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            tags: DashMap::new(),
            keys: DashMap::new(),
            storage,
        }
    }

    /// Record that `key` is stored under `tags`
    ///
    /// Replaces any tag set previously registered for the key. An empty tag
    /// set leaves the key unindexed. A no-op when storage tracks tags.
    pub fn register<I>(&self, key: &str, tags: I)
    where
        I: IntoIterator<Item = Tag>,
    {
        if self.storage.tracks_tags() {
            return;
        }

        let tags: HashSet<Tag> = tags.into_iter().collect();
        {
            // Held until the buckets match the new tag set
            let mut slot = self.keys.entry(key.to_string()).or_default();
            let previous = std::mem::replace(slot.value_mut(), tags.clone());

            for tag in &tags {
                self.tags
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.to_string());
            }
            for stale in previous.difference(&tags) {
                self.unlink(key, stale);
            }
        }

        if tags.is_empty() {
            self.keys.remove_if(key, |_, tags| tags.is_empty());
        }
    }

    /// Delete every entry stored under `tag`
    ///
    /// Returns how many keys storage actually removed. Keys are unlinked
    /// from the index before the storage call, so a failed purge leaves the
    /// entries to expire by TTL.
    pub async fn invalidate(&self, tag: &str) -> Result<usize> {
        if self.storage.tracks_tags() {
            let removed = self
                .storage
                .invalidate_tag(tag)
                .await
                .map_err(|e| CacheError::Invalidation {
                    tag: tag.to_string(),
                    reason: e.to_string(),
                })?;
            info!(
                "Invalidated {} entries in {} storage ({})",
                removed,
                self.storage.kind(),
                InvalidationReason::TagMatch {
                    tag: tag.to_string()
                }
            );
            return Ok(removed);
        }

        let Some((_, keys)) = self.tags.remove(tag) else {
            debug!("No entries registered under tag: {}", tag);
            return Ok(0);
        };

        let keys: Vec<CacheKey> = keys.into_iter().collect();
        for key in &keys {
            self.detach(key, Some(tag));
        }

        let removed = self
            .storage
            .delete_many(&keys)
            .await
            .map_err(|e| CacheError::Invalidation {
                tag: tag.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            "Invalidated {} entries ({})",
            removed,
            InvalidationReason::TagMatch {
                tag: tag.to_string()
            }
        );
        Ok(removed)
    }

    /// Drop a key and its tag links without touching storage
    pub fn unregister(&self, key: &str) {
        self.detach(key, None);
    }

    /// Keys currently registered under a tag
    pub fn keys_for_tag(&self, tag: &str) -> HashSet<CacheKey> {
        self.tags
            .get(tag)
            .map(|keys| keys.value().clone())
            .unwrap_or_default()
    }

    /// Tags a key is registered under
    pub fn tags_for_key(&self, key: &str) -> HashSet<Tag> {
        self.keys
            .get(key)
            .map(|tags| tags.value().clone())
            .unwrap_or_default()
    }

    /// Get the number of tracked tags
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Get the number of tracked keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Clear all mappings
    pub fn clear(&self) {
        self.tags.clear();
        self.keys.clear();
    }

    /// Remove the key entry, then the key from each of its tag buckets
    /// except `skip`, dropping buckets that become empty
    fn detach(&self, key: &str, skip: Option<&str>) {
        let Entry::Occupied(slot) = self.keys.entry(key.to_string()) else {
            return;
        };

        for tag in slot.get() {
            if skip != Some(tag.as_str()) {
                self.unlink(key, tag);
            }
        }
        slot.remove();
    }

    fn unlink(&self, key: &str, tag: &str) {
        if let Some(mut bucket) = self.tags.get_mut(tag) {
            bucket.remove(key);
        }
        self.tags.remove_if(tag, |_, bucket| bucket.is_empty());
    }
}

impl EvictionListener for InvalidationIndex {
    fn on_evicted(&self, key: &str, _tags: &BTreeSet<Tag>, reason: InvalidationReason) {
        debug!("Unlinking {} from tag index ({})", key, reason);
        self.unregister(key);
    }
}
