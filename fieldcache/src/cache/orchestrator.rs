//! Field cache orchestrator
//!
//! [`FieldCache::resolve`] is the single hook the query layer calls around
//! each field resolution. It looks up the field's policy and routes the
//! invocation:
//!
//! - **Skip**: no applicable policy, or a nested field; resolve directly,
//!   no storage calls
//! - **Read**: query with a `references` policy; serve from storage or
//!   resolve once per key and populate
//! - **Write**: mutation with an `invalidate` policy; resolve, then purge tags
//!
//! Cache failures never reach the caller. They are logged and the
//! invocation degrades to a direct resolution.

use crate::cache::config::CacheConfig;
use crate::cache::dedupe::{DedupeTracker, Pending};
use crate::cache::entry::CacheEntry;
use crate::cache::invalidation::{InvalidationIndex, InvalidationReason};
use crate::cache::keys::build_key;
use crate::cache::observer::{notify, CacheEvent, CacheObserver, NoopObserver};
use crate::cache::policy::{Policy, PolicyRegistry};
use crate::cache::storage::{self, EvictionListener, StorageBackend};
use crate::cache::types::{
    Arguments, CacheKey, CacheStats, FieldInvocation, OperationType, StatsCounters,
};
use crate::error::Result as CacheResult;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Shared field-level cache
///
/// Cheap to clone; every clone serves the same storage, index and pending
/// resolutions. `E` is the resolver error type, handed unchanged to the
/// caller and to every deduplicated waiter.
pub struct FieldCache<E> {
    inner: Arc<Inner<E>>,
}

struct Inner<E> {
    config: CacheConfig,
    policies: PolicyRegistry,
    storage: Arc<dyn StorageBackend>,
    index: Arc<InvalidationIndex>,
    pending: DedupeTracker<Result<Value, E>>,
    observer: Arc<dyn CacheObserver>,
    stats: StatsCounters,
}

impl<E> Clone for FieldCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> FieldCache<E>
where
    E: Clone + Display + Send + Sync + 'static,
{
    pub fn builder() -> FieldCacheBuilder<E> {
        FieldCacheBuilder::new()
    }

    /// Resolve one field invocation through the cache
    ///
    /// `resolve_upstream` runs at most once. On a read miss it runs on a
    /// spawned task, so cache population completes even if this caller is
    /// dropped. A panic inside it is re-raised here. Policies apply to root
    /// fields only; an invocation carrying a parent result is resolved
    /// directly.
    ///
    /// # Panics
    ///
    /// Panics if the runtime cancels the spawned resolution after
    /// `resolve_upstream` has started, which happens only during runtime
    /// shutdown. A resolution cancelled before it starts runs on the caller.
    pub async fn resolve<F, Fut>(
        &self,
        invocation: FieldInvocation<'_>,
        resolve_upstream: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
    {
        if invocation.parent.is_some() {
            debug!("Nested field {} resolved without cache", invocation.field_name);
            return self.skip(invocation, resolve_upstream).await;
        }

        let policy = self
            .inner
            .policies
            .lookup(invocation.operation, invocation.field_name);

        match (invocation.operation, policy) {
            (OperationType::Query, Some(policy)) if policy.is_read() => {
                self.read(invocation, policy, resolve_upstream).await
            }
            (OperationType::Mutation, Some(policy)) if policy.is_write() => {
                self.write(invocation, policy, resolve_upstream).await
            }
            _ => self.skip(invocation, resolve_upstream).await,
        }
    }

    /// Purge every entry stored under `tag`
    pub async fn invalidate(&self, tag: &str) -> CacheResult<usize> {
        let removed = self.inner.index.invalidate(tag).await?;
        StatsCounters::add(&self.inner.stats.invalidated_keys, removed as u64);
        Ok(removed)
    }

    /// Drop every stored entry and tag link
    pub async fn clear(&self) -> CacheResult<()> {
        self.inner.storage.clear().await?;
        self.inner.index.clear();
        info!("Cache cleared ({})", InvalidationReason::Manual);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.inner.policies
    }

    /// The tag index, for inspection
    pub fn index(&self) -> &InvalidationIndex {
        &self.inner.index
    }

    /// Number of keys with an upstream resolution in flight
    pub fn in_flight(&self) -> usize {
        self.inner.pending.in_flight()
    }

    async fn skip<F, Fut>(
        &self,
        invocation: FieldInvocation<'_>,
        resolve_upstream: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        StatsCounters::incr(&self.inner.stats.skips);
        self.emit(CacheEvent::Skip, &invocation);
        resolve_upstream().await
    }

    async fn read<F, Fut>(
        &self,
        invocation: FieldInvocation<'_>,
        policy: &Policy,
        resolve_upstream: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
    {
        let key = build_key(invocation.field_name, invocation.arguments);

        match self.inner.storage.get(&key).await {
            Ok(Some(value)) => {
                StatsCounters::incr(&self.inner.stats.hits);
                self.emit(CacheEvent::Hit, &invocation);
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                StatsCounters::incr(&self.inner.stats.storage_errors);
                warn!(
                    "Cache read failed for {} ({}), resolving without cache: {}",
                    key,
                    self.inner.storage.kind(),
                    e
                );
            }
        }

        let guard = match self.inner.pending.join(&key) {
            Pending::Leader(guard) => guard,
            Pending::Follower(waiter) => {
                return match waiter.wait().await {
                    Some(outcome) => {
                        StatsCounters::incr(&self.inner.stats.dedupes);
                        self.emit(CacheEvent::Dedupe, &invocation);
                        outcome
                    }
                    None => {
                        debug!("Pending resolution for {} was abandoned, resolving directly", key);
                        resolve_upstream().await
                    }
                };
            }
        };

        StatsCounters::incr(&self.inner.stats.misses);
        self.emit(CacheEvent::Miss, &invocation);

        let inner = Arc::clone(&self.inner);
        let policy = policy.clone();
        let arguments = invocation.arguments.clone();

        // Reclaimed by this caller if the task is cancelled before it starts
        let upstream = Arc::new(Mutex::new(Some(resolve_upstream)));
        let slot = Arc::clone(&upstream);

        let task = tokio::spawn(async move {
            let claimed = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            let Some(resolve_upstream) = claimed else {
                return None;
            };

            let outcome = resolve_upstream().await;
            match &outcome {
                Ok(value) => inner.populate(guard.key(), &policy, &arguments, value).await,
                Err(e) => debug!(
                    "Upstream resolution for {} failed, nothing stored: {}",
                    guard.key(),
                    e
                ),
            }
            guard.settle(outcome.clone());
            Some(outcome)
        });

        let cancelled = match task.await {
            Ok(Some(outcome)) => return outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Ok(None) => "resolver already claimed".to_string(),
            Err(e) => e.to_string(),
        };

        let unclaimed = upstream.lock().unwrap_or_else(PoisonError::into_inner).take();
        match unclaimed {
            Some(resolve_upstream) => {
                warn!(
                    "Resolution task for {} was cancelled before it started ({}), resolving directly",
                    key, cancelled
                );
                resolve_upstream().await
            }
            None => panic!("resolution task for {} did not complete: {}", key, cancelled),
        }
    }

    async fn write<F, Fut>(
        &self,
        invocation: FieldInvocation<'_>,
        policy: &Policy,
        resolve_upstream: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let value = resolve_upstream().await?;

        for tag in policy.invalidations_for(invocation.arguments, &value) {
            match self.inner.index.invalidate(&tag).await {
                Ok(removed) => {
                    StatsCounters::add(&self.inner.stats.invalidated_keys, removed as u64);
                }
                Err(e) => {
                    StatsCounters::incr(&self.inner.stats.storage_errors);
                    warn!(
                        "Invalidation after {} failed, entries may stay stale until TTL: {}",
                        invocation.field_name, e
                    );
                }
            }
        }

        Ok(value)
    }

    fn emit(&self, event: CacheEvent, invocation: &FieldInvocation<'_>) {
        notify(
            self.inner.observer.as_ref(),
            event,
            invocation.operation,
            invocation.field_name,
        );
    }
}

impl<E> Inner<E> {
    /// Store a fresh read result and index its tags
    async fn populate(&self, key: &str, policy: &Policy, arguments: &Arguments, value: &Value) {
        let tags = policy.references_for(arguments, value);
        let ttl = self
            .config
            .ttl_with_jitter(policy.ttl().unwrap_or_else(|| self.config.ttl()));

        let entry =
            CacheEntry::new(key.to_string(), value.clone(), ttl).with_tags(tags.iter().cloned());

        match self.storage.set(entry).await {
            Ok(()) => {
                debug!("Stored {} under {} tags (ttl: {:?})", key, tags.len(), ttl);
                self.index.register(key, tags);
            }
            Err(e) => {
                StatsCounters::incr(&self.stats.storage_errors);
                warn!("Cache write failed for {}, value returned uncached: {}", key, e);
            }
        }
    }
}

/// Builder for [`FieldCache`]
pub struct FieldCacheBuilder<E> {
    config: CacheConfig,
    policies: PolicyRegistry,
    observer: Arc<dyn CacheObserver>,
    storage: Option<Arc<dyn StorageBackend>>,
    _error: std::marker::PhantomData<fn() -> E>,
}

impl<E> FieldCacheBuilder<E>
where
    E: Clone + Display + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            policies: PolicyRegistry::empty(),
            observer: Arc::new(NoopObserver),
            storage: None,
            _error: std::marker::PhantomData,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = policies;
        self
    }

    pub fn observer(mut self, observer: impl CacheObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Use this backend instead of the one named by the configuration
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Validate the configuration and connect the storage backend
    pub async fn build(self) -> CacheResult<FieldCache<E>> {
        self.config.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => storage::connect(&self.config).await?,
        };

        let index = Arc::new(InvalidationIndex::new(Arc::clone(&storage)));
        let listener: Weak<dyn EvictionListener> = Arc::downgrade(&index) as Weak<dyn EvictionListener>;
        storage.watch_evictions(listener);

        info!(
            "Field cache ready (storage: {}, policies: {}, ttl: {}s)",
            storage.kind(),
            self.policies.len(),
            self.config.ttl_seconds
        );

        Ok(FieldCache {
            inner: Arc::new(Inner {
                config: self.config,
                policies: self.policies,
                storage,
                index,
                pending: DedupeTracker::new(),
                observer: self.observer,
                stats: StatsCounters::default(),
            }),
        })
    }
}

/// Key a read invocation would be stored under
pub fn key_for(invocation: &FieldInvocation<'_>) -> CacheKey {
    build_key(invocation.field_name, invocation.arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::observer::CallbackObserver;
    use crate::cache::storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            other => panic!("arguments must be an object, got {}", other),
        }
    }

    fn registry() -> PolicyRegistry {
        PolicyRegistry::builder()
            .query(
                "user",
                Policy::references(|args, _| vec![format!("user:{}", args["id"])]),
            )
            .query("users", Policy::references(|_, _| vec!["users".to_string()]))
            .mutation("addUser", Policy::invalidate(|_, _| vec!["users".to_string()]))
            .build()
    }

    async fn cache_with(store: Arc<MemoryStore>) -> FieldCache<String> {
        FieldCache::builder()
            .policies(registry())
            .storage(store)
            .build()
            .await
            .unwrap()
    }

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> impl FnOnce() -> std::future::Ready<Result<Value, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test]
    async fn test_read_miss_then_hit() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let arguments = args(json!({"id": 1}));

        let first = cache
            .resolve(FieldInvocation::query("user", &arguments), counted(&calls, json!({"id": 1})))
            .await
            .unwrap();
        let second = cache
            .resolve(FieldInvocation::query("user", &arguments), counted(&calls, json!("unused")))
            .await
            .unwrap();

        assert_eq!(first, json!({"id": 1}));
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!(cache.index().keys_for_tag("user:1").contains(r#"user:{"id":1}"#));
    }

    #[tokio::test]
    async fn test_skip_without_policy() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let arguments = Arguments::new();

        for _ in 0..2 {
            cache
                .resolve(FieldInvocation::query("groups", &arguments), counted(&calls, json!([])))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
        assert_eq!(cache.stats().skips, 2);
    }

    #[tokio::test]
    async fn test_policy_with_wrong_operation_skips() {
        let store = Arc::new(MemoryStore::new(16));
        let policies = PolicyRegistry::builder()
            .mutation("user", Policy::references(|_, _| vec!["x".to_string()]))
            .build();
        let cache: FieldCache<String> = FieldCache::builder()
            .policies(policies)
            .storage(store.clone())
            .build()
            .await
            .unwrap();

        let arguments = Arguments::new();
        cache
            .resolve(FieldInvocation::mutation("user", &arguments), || async { Ok(json!(1)) })
            .await
            .unwrap();

        assert!(store.is_empty());
        assert_eq!(cache.stats().skips, 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_tags() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let list_args = args(json!({"page": 1}));
        let user_args = args(json!({"id": 1}));

        cache
            .resolve(FieldInvocation::query("users", &list_args), counted(&calls, json!([1])))
            .await
            .unwrap();
        cache
            .resolve(FieldInvocation::query("user", &user_args), counted(&calls, json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        let mutation_args = args(json!({"name": "Zed"}));
        cache
            .resolve(FieldInvocation::mutation("addUser", &mutation_args), || async {
                Ok(json!({"id": 10}))
            })
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains_key(r#"user:{"id":1}"#));
        assert_eq!(cache.stats().invalidated_keys, 1);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_invalidate() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;
        let list_args = Arguments::new();

        cache
            .resolve(FieldInvocation::query("users", &list_args), || async { Ok(json!([])) })
            .await
            .unwrap();

        let result = cache
            .resolve(FieldInvocation::mutation("addUser", &list_args), || async {
                Err::<Value, _>("duplicate".to_string())
            })
            .await;

        assert_eq!(result, Err("duplicate".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_is_not_cached() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;
        let arguments = args(json!({"id": 2}));

        let result = cache
            .resolve(FieldInvocation::query("user", &arguments), || async {
                Err::<Value, _>("boom".to_string())
            })
            .await;

        assert_eq!(result, Err("boom".to_string()));
        assert!(store.is_empty());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_observer_hooks_fire() {
        let hits = Arc::new(AtomicUsize::new(0));
        let misses = Arc::new(AtomicUsize::new(0));
        let skips = Arc::new(AtomicUsize::new(0));

        let observer = {
            let (hits, misses, skips) = (hits.clone(), misses.clone(), skips.clone());
            CallbackObserver::new()
                .on_hit(move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .on_miss(move |_, _| {
                    misses.fetch_add(1, Ordering::SeqCst);
                })
                .on_skip(move |_, _| {
                    skips.fetch_add(1, Ordering::SeqCst);
                })
        };

        let cache: FieldCache<String> = FieldCache::builder()
            .policies(registry())
            .observer(observer)
            .storage(Arc::new(MemoryStore::new(16)))
            .build()
            .await
            .unwrap();

        let arguments = args(json!({"id": 3}));
        for _ in 0..3 {
            cache
                .resolve(FieldInvocation::query("user", &arguments), || async { Ok(json!(3)) })
                .await
                .unwrap();
        }
        cache
            .resolve(FieldInvocation::query("nothing", &arguments), || async { Ok(json!(0)) })
            .await
            .unwrap();

        assert_eq!(misses.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(skips.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reads_fire_dedupe_hook() {
        let misses = Arc::new(AtomicUsize::new(0));
        let dedupes = Arc::new(AtomicUsize::new(0));

        let observer = {
            let (misses, dedupes) = (misses.clone(), dedupes.clone());
            CallbackObserver::new()
                .on_miss(move |_, _| {
                    misses.fetch_add(1, Ordering::SeqCst);
                })
                .on_dedupe(move |operation, field| {
                    assert_eq!(operation, OperationType::Query);
                    assert_eq!(field, "user");
                    dedupes.fetch_add(1, Ordering::SeqCst);
                })
        };

        let cache: FieldCache<String> = FieldCache::builder()
            .policies(registry())
            .observer(observer)
            .storage(Arc::new(MemoryStore::new(16)))
            .build()
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let arguments = args(json!({"id": 4}));
        let reads = (0..5).map(|_| {
            let calls = calls.clone();
            cache.resolve(FieldInvocation::query("user", &arguments), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!({"id": 4}))
            })
        });
        let results = futures::future::join_all(reads).await;

        assert!(results.iter().all(|r| r == &Ok(json!({"id": 4}))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(misses.load(Ordering::SeqCst), 1);
        assert_eq!(dedupes.load(Ordering::SeqCst), 4);
        assert_eq!(cache.stats().dedupes, 4);
    }

    #[tokio::test]
    async fn test_nested_field_skips() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let parent = json!({"id": 7, "groups": [1]});
        let arguments = args(json!({"id": 1}));

        for _ in 0..2 {
            cache
                .resolve(
                    FieldInvocation::query("user", &arguments).with_parent(&parent),
                    counted(&calls, json!({"id": 1})),
                )
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
        assert_eq!(cache.stats().skips, 2);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_huge_policy_ttl_is_stored() {
        let store = Arc::new(MemoryStore::new(16));
        let policies = PolicyRegistry::builder()
            .query(
                "forever",
                Policy::references(|_, _| vec!["forever".to_string()]).ttl(Duration::MAX),
            )
            .build();
        let cache: FieldCache<String> = FieldCache::builder()
            .policies(policies)
            .storage(store.clone())
            .build()
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let arguments = Arguments::new();
        for _ in 0..2 {
            cache
                .resolve(FieldInvocation::query("forever", &arguments), counted(&calls, json!(1)))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_policy_ttl_override() {
        let store = Arc::new(MemoryStore::new(16));
        let policies = PolicyRegistry::builder()
            .query(
                "clock",
                Policy::references(|_, _| Vec::new()).ttl(Duration::from_millis(50)),
            )
            .build();
        let cache: FieldCache<String> = FieldCache::builder()
            .policies(policies)
            .storage(store.clone())
            .build()
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let arguments = Arguments::new();
        cache
            .resolve(FieldInvocation::query("clock", &arguments), counted(&calls, json!(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache
            .resolve(FieldInvocation::query("clock", &arguments), counted(&calls, json!(2)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_manual_invalidate_and_clear() {
        let store = Arc::new(MemoryStore::new(16));
        let cache = cache_with(store.clone()).await;

        for id in 1..=3 {
            let arguments = args(json!({"id": id}));
            cache
                .resolve(FieldInvocation::query("user", &arguments), move || async move {
                    Ok(json!({"id": id}))
                })
                .await
                .unwrap();
        }

        assert_eq!(cache.invalidate("user:2").await.unwrap(), 1);
        assert_eq!(store.len(), 2);

        cache.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(cache.index().key_count(), 0);
    }

    #[test]
    fn test_key_for() {
        let arguments = args(json!({"size": 3, "page": 1}));
        assert_eq!(
            key_for(&FieldInvocation::query("users", &arguments)),
            r#"users:{"page":1,"size":3}"#
        );
    }
}
