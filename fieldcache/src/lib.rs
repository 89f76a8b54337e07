//! # fieldcache
//!
//! A field-level response cache for query layers that resolve one root
//! field at a time.
//!
//! ## Features
//!
//! - Policy-driven caching of root query fields, tag purges on mutations
//! - Async-first design using tokio
//! - In-process LRU store or redis, chosen by configuration
//! - One upstream resolution per key under concurrent load
//! - Observer hooks for hits, misses, skips and deduplicated reads
//! - Storage failures degrade to direct resolution instead of erroring
//!
//! ## Resolving a field
//!
//! The query layer hands every root field to [`FieldCache::resolve`] together
//! with a closure producing the real result:
//!
//! ```no_run
//! use fieldcache::{CacheConfig, FieldCache, FieldInvocation, Policy, PolicyRegistry};
//! use serde_json::{json, Map};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let policies = PolicyRegistry::builder()
//!         .query("users", Policy::references(|_, _| vec!["users".to_string()]))
//!         .mutation("addUser", Policy::invalidate(|_, _| vec!["users".to_string()]))
//!         .build();
//!
//!     let cache: FieldCache<String> = FieldCache::builder()
//!         .config(CacheConfig::from_env()?)
//!         .policies(policies)
//!         .build()
//!         .await?;
//!
//!     let arguments = Map::new();
//!     let users = cache
//!         .resolve(FieldInvocation::query("users", &arguments), || async {
//!             Ok(json!([{"id": 1, "name": "Alice"}]))
//!         })
//!         .await;
//!     println!("users: {:?}", users);
//!     Ok(())
//! }
//! ```
//!
//! ## Remote storage
//!
//! ```no_run
//! use fieldcache::{CacheConfig, FieldCache, RemoteOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CacheConfig::builder()
//!         .remote(RemoteOptions {
//!             endpoint: "redis://127.0.0.1:6379".to_string(),
//!             key_prefix: "app:".to_string(),
//!             ..RemoteOptions::default()
//!         })
//!         .build();
//!
//!     let cache: FieldCache<String> = FieldCache::builder().config(config).build().await?;
//!     println!("stats: {}", cache.stats());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    build_key, key_for, Arguments, CacheConfig, CacheConfigBuilder, CacheEntry, CacheEvent,
    CacheKey, CacheKeyBuilder, CacheObserver, CacheStats, CallbackObserver, EvictionListener,
    FieldCache, FieldCacheBuilder, FieldInvocation, InvalidationIndex, InvalidationReason,
    MemoryOptions, MemoryStore, NoopObserver, OperationType, Policy, PolicyRegistry,
    RemoteOptions, RemoteStore, StorageBackend, StorageConfig, Tag, TracingObserver,
};
pub use error::{CacheError, Result};
