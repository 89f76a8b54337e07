//! Observer hooks fired by the cache
//!
//! Hooks are called synchronously on the cache path. They must return
//! quickly; a panicking hook is caught, logged, and otherwise ignored.

use crate::cache::types::OperationType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one field invocation, as reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEvent {
    /// Served from storage
    Hit,
    /// This caller resolved upstream and populated the cache
    Miss,
    /// No applicable policy; resolved directly
    Skip,
    /// Received the outcome of a concurrent resolution
    Dedupe,
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheEvent::Hit => "hit",
            CacheEvent::Miss => "miss",
            CacheEvent::Skip => "skip",
            CacheEvent::Dedupe => "dedupe",
        };
        f.write_str(name)
    }
}

/// Receives cache events; every hook defaults to doing nothing
pub trait CacheObserver: Send + Sync {
    fn on_hit(&self, _operation: OperationType, _field_name: &str) {}

    fn on_miss(&self, _operation: OperationType, _field_name: &str) {}

    fn on_skip(&self, _operation: OperationType, _field_name: &str) {}

    fn on_dedupe(&self, _operation: OperationType, _field_name: &str) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {}

/// Logs every event through `tracing`
///
/// Hits, misses and dedupes are logged at `info`, skips at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_hit(&self, operation: OperationType, field_name: &str) {
        info!(%operation, field = field_name, "Cache hit");
    }

    fn on_miss(&self, operation: OperationType, field_name: &str) {
        info!(%operation, field = field_name, "Cache miss");
    }

    fn on_skip(&self, operation: OperationType, field_name: &str) {
        debug!(%operation, field = field_name, "Cache skip");
    }

    fn on_dedupe(&self, operation: OperationType, field_name: &str) {
        info!(%operation, field = field_name, "Cache dedupe");
    }
}

type Hook = Arc<dyn Fn(OperationType, &str) + Send + Sync>;

/// Observer assembled from closures
///
/// ```
/// use fieldcache::CallbackObserver;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = hits.clone();
/// let observer = CallbackObserver::new().on_hit(move |_, _| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
/// # let _ = observer;
/// ```
#[derive(Clone, Default)]
pub struct CallbackObserver {
    hit: Option<Hook>,
    miss: Option<Hook>,
    skip: Option<Hook>,
    dedupe: Option<Hook>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(OperationType, &str) + Send + Sync + 'static,
    {
        self.hit = Some(Arc::new(f));
        self
    }

    pub fn on_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(OperationType, &str) + Send + Sync + 'static,
    {
        self.miss = Some(Arc::new(f));
        self
    }

    pub fn on_skip<F>(mut self, f: F) -> Self
    where
        F: Fn(OperationType, &str) + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(f));
        self
    }

    pub fn on_dedupe<F>(mut self, f: F) -> Self
    where
        F: Fn(OperationType, &str) + Send + Sync + 'static,
    {
        self.dedupe = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("hit", &self.hit.is_some())
            .field("miss", &self.miss.is_some())
            .field("skip", &self.skip.is_some())
            .field("dedupe", &self.dedupe.is_some())
            .finish()
    }
}

impl CacheObserver for CallbackObserver {
    fn on_hit(&self, operation: OperationType, field_name: &str) {
        if let Some(hook) = &self.hit {
            hook(operation, field_name);
        }
    }

    fn on_miss(&self, operation: OperationType, field_name: &str) {
        if let Some(hook) = &self.miss {
            hook(operation, field_name);
        }
    }

    fn on_skip(&self, operation: OperationType, field_name: &str) {
        if let Some(hook) = &self.skip {
            hook(operation, field_name);
        }
    }

    fn on_dedupe(&self, operation: OperationType, field_name: &str) {
        if let Some(hook) = &self.dedupe {
            hook(operation, field_name);
        }
    }
}

/// Dispatch an event, containing any panic raised by the observer
pub(crate) fn notify(
    observer: &dyn CacheObserver,
    event: CacheEvent,
    operation: OperationType,
    field_name: &str,
) {
    let result = catch_unwind(AssertUnwindSafe(|| match event {
        CacheEvent::Hit => observer.on_hit(operation, field_name),
        CacheEvent::Miss => observer.on_miss(operation, field_name),
        CacheEvent::Skip => observer.on_skip(operation, field_name),
        CacheEvent::Dedupe => observer.on_dedupe(operation, field_name),
    }));

    if result.is_err() {
        warn!(
            "Observer panicked on {} for {} {}; ignoring",
            event, operation, field_name
        );
    }
}
