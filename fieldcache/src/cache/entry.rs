//! Cache entry with TTL deadline and invalidation tags

use crate::cache::types::{CacheKey, Tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

/// A stored field result
///
/// Entries are immutable once built; a re-store replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached field result
    pub value: Value,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Deadline after which the entry is treated as absent
    pub expires_at: DateTime<Utc>,

    /// Tags the entry was registered under
    pub tags: BTreeSet<Tag>,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    ///
    /// Deadlines past the representable range saturate at `DateTime::MAX_UTC`.
    pub fn new(key: CacheKey, value: Value, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key,
            value,
            created_at: now,
            expires_at,
            tags: BTreeSet::new(),
        }
    }

    /// Attach invalidation tags
    pub fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.tags.extend(tags);
        self
    }

    /// Check if the entry has expired
    ///
    /// The entry is authoritative only while `now < expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let now = Utc::now();
        if self.is_expired_at(now) {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}
