//! Error types for cache operations
//!
//! These errors never reach callers of [`FieldCache::resolve`](crate::FieldCache::resolve):
//! the orchestrator logs them and degrades to direct resolution. They surface
//! from the storage backends, the invalidation index and configuration
//! loading, where callers drive those components directly.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Storage backend failed while reading
    #[error("Storage read error: {0}")]
    StorageRead(String),

    /// Storage backend failed while persisting an entry
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Tag purge did not complete
    #[error("Invalidation of tag '{tag}' failed: {reason}")]
    Invalidation { tag: String, reason: String },

    /// Remote store driver error (wrapper)
    #[error("Remote store error: {0}")]
    Remote(#[from] redis::RedisError),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
