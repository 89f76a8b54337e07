//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key type - derived from field name and canonical arguments
pub type CacheKey = String;

/// Opaque invalidation label attached to cache entries
pub type Tag = String;

/// Field arguments as handed over by the query layer
pub type Arguments = serde_json::Map<String, Value>;

/// Root operation a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Read operation, eligible for caching
    Query,
    /// Write operation, never served from cache
    Mutation,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Query => write!(f, "Query"),
            OperationType::Mutation => write!(f, "Mutation"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "query" => Ok(OperationType::Query),
            "mutation" => Ok(OperationType::Mutation),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// One field resolution as seen by the cache
#[derive(Debug, Clone, Copy)]
pub struct FieldInvocation<'a> {
    /// Root operation type
    pub operation: OperationType,

    /// Field being resolved
    pub field_name: &'a str,

    /// Arguments of the field
    pub arguments: &'a Arguments,

    /// Result of the parent field, if any (root fields have none)
    pub parent: Option<&'a Value>,
}

impl<'a> FieldInvocation<'a> {
    pub fn new(operation: OperationType, field_name: &'a str, arguments: &'a Arguments) -> Self {
        Self {
            operation,
            field_name,
            arguments,
            parent: None,
        }
    }

    /// Invocation of a root query field
    pub fn query(field_name: &'a str, arguments: &'a Arguments) -> Self {
        Self {
            operation: OperationType::Query,
            field_name,
            arguments,
            parent: None,
        }
    }

    /// Invocation of a root mutation field
    pub fn mutation(field_name: &'a str, arguments: &'a Arguments) -> Self {
        Self {
            operation: OperationType::Mutation,
            field_name,
            arguments,
            parent: None,
        }
    }

    /// Attach the parent result
    pub fn with_parent(mut self, parent: &'a Value) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of upstream resolutions caused by a miss
    pub misses: u64,

    /// Invocations that bypassed the cache (no policy)
    pub skips: u64,

    /// Reads served by joining an in-flight resolution
    pub dedupes: u64,

    /// Keys purged through tag invalidation
    pub invalidated_keys: u64,

    /// Storage failures absorbed by degraded mode
    pub storage_errors: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    ///
    /// Deduplicated reads count as hits: they did not trigger a resolution.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.dedupes;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            (served as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, dedupes: {}, skips: {}, hit_rate: {:.2}%, invalidated: {}, storage_errors: {} }}",
            self.hits,
            self.misses,
            self.dedupes,
            self.skips,
            self.hit_rate(),
            self.invalidated_keys,
            self.storage_errors
        )
    }
}

/// Lock-free counters behind [`CacheStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub skips: AtomicU64,
    pub dedupes: AtomicU64,
    pub invalidated_keys: AtomicU64,
    pub storage_errors: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            dedupes: self.dedupes.load(Ordering::Relaxed),
            invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}
