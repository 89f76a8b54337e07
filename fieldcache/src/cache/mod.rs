//! # Field-Level Response Cache
//!
//! Caches the results of individual root fields of a query, keyed by field
//! name and canonical arguments, and purges them by tag when a mutation
//! reports that the underlying data changed.
//!
//! ## Features
//!
//! - **Per-field policies**: only fields with a registered [`Policy`] are cached
//! - **Deterministic keys**: argument order never changes the key
//! - **Tag invalidation**: mutations purge every entry under the tags they name
//! - **Request coalescing**: concurrent identical misses share one resolution
//! - **Pluggable storage**: bounded in-process LRU store or redis
//! - **Degraded mode**: storage failures fall back to direct resolution
//!
//! ## Example
//!
//! ```rust
//! use fieldcache::cache::{CacheConfig, FieldCache, FieldInvocation, Policy, PolicyRegistry};
//! use serde_json::{json, Map};
//!
//! # async fn example() -> fieldcache::Result<()> {
//! let policies = PolicyRegistry::builder()
//!     .query("user", Policy::references(|args, _| vec![format!("user:{}", args["id"])]))
//!     .mutation("updateUser", Policy::invalidate(|args, _| vec![format!("user:{}", args["id"])]))
//!     .build();
//!
//! let cache: FieldCache<String> = FieldCache::builder()
//!     .config(CacheConfig::builder().memory(1_000).build())
//!     .policies(policies)
//!     .build()
//!     .await?;
//!
//! let mut arguments = Map::new();
//! arguments.insert("id".to_string(), json!(1));
//!
//! // The first call resolves, the second is served from the cache
//! for _ in 0..2 {
//!     let user = cache
//!         .resolve(FieldInvocation::query("user", &arguments), || async {
//!             Ok(json!({"id": 1, "name": "Alice"}))
//!         })
//!         .await;
//!     assert_eq!(user, Ok(json!({"id": 1, "name": "Alice"})));
//! }
//! assert_eq!(cache.stats().hits, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dedupe;
pub mod entry;
pub mod invalidation;
pub mod keys;
pub mod observer;
pub mod orchestrator;
pub mod policy;
pub mod storage;
pub mod types;

pub use config::{
    CacheConfig, CacheConfigBuilder, MemoryOptions, RemoteOptions, StorageConfig, MAX_TTL_SECONDS,
};
pub use dedupe::{DedupeTracker, Pending, PendingGuard, PendingWaiter};
pub use entry::CacheEntry;
pub use invalidation::{InvalidationIndex, InvalidationReason};
pub use keys::{build_key, CacheKeyBuilder};
pub use observer::{CacheEvent, CacheObserver, CallbackObserver, NoopObserver, TracingObserver};
pub use orchestrator::{key_for, FieldCache, FieldCacheBuilder};
pub use policy::{Policy, PolicyBuilder, PolicyRegistry, PolicyRegistryBuilder, TagFn};
pub use storage::{EvictionListener, MemoryStats, MemoryStore, RemoteStore, StorageBackend};
pub use types::{Arguments, CacheKey, CacheStats, FieldInvocation, OperationType, Tag};
