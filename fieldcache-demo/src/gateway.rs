//! Entry point for executing root fields through the cache

use crate::data::DataStore;
use crate::policies;
use crate::schema::{resolve_field, ResolveError};
use fieldcache::{
    Arguments, CacheConfig, CacheObserver, FieldCache, FieldInvocation, OperationType,
    TracingObserver,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Sample data served through a [`FieldCache`]
#[derive(Clone)]
pub struct Gateway {
    data: Arc<DataStore>,
    cache: FieldCache<ResolveError>,
}

impl Gateway {
    /// Gateway logging cache events through `tracing`
    pub async fn new(config: CacheConfig, data: DataStore) -> fieldcache::Result<Self> {
        Self::with_observer(config, data, TracingObserver).await
    }

    pub async fn with_observer(
        config: CacheConfig,
        data: DataStore,
        observer: impl CacheObserver + 'static,
    ) -> fieldcache::Result<Self> {
        let cache = FieldCache::builder()
            .config(config)
            .policies(policies::registry())
            .observer(observer)
            .build()
            .await?;

        Ok(Self {
            data: Arc::new(data),
            cache,
        })
    }

    /// Execute one root field
    pub async fn execute(
        &self,
        operation: OperationType,
        field: &str,
        arguments: &Arguments,
    ) -> Result<Value, ResolveError> {
        debug!("Executing {} {}", operation, field);

        let data = Arc::clone(&self.data);
        let field_name = field.to_string();
        let args = arguments.clone();

        self.cache
            .resolve(FieldInvocation::new(operation, field, arguments), move || async move {
                resolve_field(&data, operation, &field_name, &args).await
            })
            .await
    }

    pub async fn query(&self, field: &str, arguments: &Arguments) -> Result<Value, ResolveError> {
        self.execute(OperationType::Query, field, arguments).await
    }

    pub async fn mutation(
        &self,
        field: &str,
        arguments: &Arguments,
    ) -> Result<Value, ResolveError> {
        self.execute(OperationType::Mutation, field, arguments).await
    }

    pub fn cache(&self) -> &FieldCache<ResolveError> {
        &self.cache
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }
}
