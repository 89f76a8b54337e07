//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time-to-live for stored entries, in seconds
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default capacity of the in-process store
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Longest accepted TTL: ten years
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Jitter never shortens a TTL below this share of its base
const MIN_JITTER_SHARE: f64 = 0.1;

/// Configuration for the field cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live for stored entries
    pub ttl_seconds: u64,

    /// TTL jitter factor (0.0 - 1.0)
    /// Spreads expiry of entries stored together to avoid a stampede
    pub ttl_jitter: f64,

    /// Storage backend selection
    pub storage: StorageConfig,

    /// Enable periodic removal of expired entries (memory store only)
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup checks
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
            ttl_jitter: 0.0,
            storage: StorageConfig::default(),
            enable_auto_cleanup: true,
            // Cleanup every 5 minutes
            cleanup_interval_seconds: 300,
        }
    }
}

/// Storage backend selection and its options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Bounded in-process LRU store
    Memory(MemoryOptions),

    /// Remote key/value store reached over the network
    Remote(RemoteOptions),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(MemoryOptions::default())
    }
}

impl StorageConfig {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Memory(_) => "memory",
            StorageConfig::Remote(_) => "remote",
        }
    }
}

/// Options of the in-process store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryOptions {
    /// Maximum number of entries held at once
    pub max_entries: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Options of the remote store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteOptions {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub endpoint: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Prefix prepended to every key written remotely
    pub key_prefix: String,

    /// Upper bound for a single remote call
    pub timeout_ms: u64,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            endpoint: "redis://127.0.0.1:6379".to_string(),
            username: None,
            password: None,
            key_prefix: String::new(),
            timeout_ms: 1000,
        }
    }
}

impl std::fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_prefix", &self.key_prefix)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl RemoteOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Default TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Interval of the background sweeper
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl_seconds == 0 {
            return Err(CacheError::ConfigError(
                "ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(CacheError::ConfigError(format!(
                "ttl_seconds must be at most {} (ten years), got {}",
                MAX_TTL_SECONDS, self.ttl_seconds
            )));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval_seconds == 0 {
            return Err(CacheError::ConfigError(
                "cleanup_interval_seconds must be greater than 0".to_string(),
            ));
        }

        match &self.storage {
            StorageConfig::Memory(memory) if memory.max_entries == 0 => Err(
                CacheError::ConfigError("memory.max_entries must be greater than 0".to_string()),
            ),
            StorageConfig::Remote(remote) if remote.endpoint.trim().is_empty() => Err(
                CacheError::ConfigError("remote.endpoint must not be empty".to_string()),
            ),
            StorageConfig::Remote(remote) if remote.timeout_ms == 0 => Err(
                CacheError::ConfigError("remote.timeout_ms must be greater than 0".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self, base: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(base_secs * MIN_JITTER_SHARE);

        Duration::try_from_secs_f64(final_secs).unwrap_or(base)
    }

    /// Load configuration from the process environment
    ///
    /// Recognised variables:
    ///
    /// | variable | meaning |
    /// |----------|---------|
    /// | `CACHE_DEFAULT_TTL` | default TTL in seconds |
    /// | `CACHE_STORAGE_TYPE` | `memory`, `remote` or `redis` |
    /// | `CACHE_STORAGE_MEMORY_SIZE` | memory store capacity |
    /// | `REDIS_URL` | full remote endpoint, wins over host/port |
    /// | `REDIS_HOST` / `REDIS_PORT` | remote endpoint parts |
    /// | `REDIS_USERNAME` / `REDIS_PASSWORD` | remote credentials |
    /// | `CACHE_KEY_PREFIX` | remote key prefix |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CacheConfig::default();

        if let Some(ttl) = lookup("CACHE_DEFAULT_TTL") {
            config.ttl_seconds = parse_var("CACHE_DEFAULT_TTL", &ttl)?;
        }

        let kind = lookup("CACHE_STORAGE_TYPE").unwrap_or_else(|| "memory".to_string());
        config.storage = match kind.to_ascii_lowercase().as_str() {
            "memory" => {
                let mut memory = MemoryOptions::default();
                if let Some(size) = lookup("CACHE_STORAGE_MEMORY_SIZE") {
                    memory.max_entries = parse_var("CACHE_STORAGE_MEMORY_SIZE", &size)?;
                }
                StorageConfig::Memory(memory)
            }
            "remote" | "redis" => {
                let mut remote = RemoteOptions::default();
                if let Some(url) = lookup("REDIS_URL") {
                    remote.endpoint = url;
                } else {
                    let host = lookup("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
                    let port: u16 = match lookup("REDIS_PORT") {
                        Some(port) => parse_var("REDIS_PORT", &port)?,
                        None => 6379,
                    };
                    remote.endpoint = format!("redis://{}:{}", host, port);
                }
                remote.username = lookup("REDIS_USERNAME");
                remote.password = lookup("REDIS_PASSWORD");
                if let Some(prefix) = lookup("CACHE_KEY_PREFIX") {
                    remote.key_prefix = prefix;
                }
                StorageConfig::Remote(remote)
            }
            other => {
                return Err(CacheError::ConfigError(format!(
                    "CACHE_STORAGE_TYPE must be 'memory' or 'remote', got '{}'",
                    other
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CacheError::ConfigError(format!("{} is invalid ({}): {}", name, raw, e)))
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    ttl_seconds: Option<u64>,
    ttl_jitter: Option<f64>,
    storage: Option<StorageConfig>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval_seconds: Option<u64>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = Some(ttl.as_secs());
        self
    }

    /// Set default TTL in seconds
    pub fn ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Use the in-process store with the given capacity
    pub fn memory(mut self, max_entries: usize) -> Self {
        self.storage = Some(StorageConfig::Memory(MemoryOptions { max_entries }));
        self
    }

    /// Use the remote store
    pub fn remote(mut self, options: RemoteOptions) -> Self {
        self.storage = Some(StorageConfig::Remote(options));
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_seconds = Some(interval.as_secs());
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            ttl_seconds: self.ttl_seconds.unwrap_or(defaults.ttl_seconds),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            storage: self.storage.unwrap_or(defaults.storage),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval_seconds: self
                .cleanup_interval_seconds
                .unwrap_or(defaults.cleanup_interval_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(3600));
        assert_eq!(
            config.storage,
            StorageConfig::Memory(MemoryOptions { max_entries: 1024 })
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = CacheConfig::default();
        invalid.ttl_seconds = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = CacheConfig::default();
        invalid.ttl_jitter = 1.5;
        assert!(invalid.validate().is_err());

        let invalid = CacheConfig::builder().memory(0).build();
        assert!(invalid.validate().is_err());

        let invalid = CacheConfig::builder()
            .remote(RemoteOptions {
                endpoint: " ".to_string(),
                ..Default::default()
            })
            .build();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .ttl(Duration::from_secs(600))
            .memory(5000)
            .enable_auto_cleanup(false)
            .build();

        assert_eq!(config.ttl_seconds, 600);
        assert_eq!(config.storage.kind(), "memory");
        assert!(!config.enable_auto_cleanup);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.ttl_with_jitter(Duration::from_secs(3600));
        assert!(ttl.as_secs_f64() >= 3600.0 * 0.9);
        assert!(ttl.as_secs_f64() <= 3600.0 * 1.1);

        let exact = CacheConfig::default().ttl_with_jitter(Duration::from_secs(42));
        assert_eq!(exact, Duration::from_secs(42));
    }

    #[test]
    fn test_jitter_keeps_short_ttls_short() {
        let config = CacheConfig {
            ttl_jitter: 0.5,
            ..Default::default()
        };
        for _ in 0..100 {
            let ttl = config.ttl_with_jitter(Duration::from_millis(200));
            assert!(ttl >= Duration::from_millis(100), "{:?}", ttl);
            assert!(ttl <= Duration::from_millis(300), "{:?}", ttl);
        }

        let full = CacheConfig {
            ttl_jitter: 1.0,
            ..Default::default()
        };
        for _ in 0..100 {
            let ttl = full.ttl_with_jitter(Duration::from_millis(100));
            assert!(ttl >= Duration::from_millis(10), "{:?}", ttl);
        }

        // Values past the Duration range fall back to the base
        assert_eq!(full.ttl_with_jitter(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_ttl_upper_bound() {
        let at_limit = CacheConfig::builder().ttl_seconds(MAX_TTL_SECONDS).build();
        assert!(at_limit.validate().is_ok());

        let too_long = CacheConfig::builder().ttl_seconds(100_000_000_000_000).build();
        assert!(matches!(too_long.validate(), Err(CacheError::ConfigError(_))));

        let from_env = CacheConfig::from_lookup(|name| {
            (name == "CACHE_DEFAULT_TTL").then(|| "100000000000000".to_string())
        });
        assert!(from_env.is_err());
    }

    #[test]
    fn test_deserialize_storage_kind() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"ttl_seconds": 60, "storage": {"kind": "remote", "endpoint": "redis://cache:6379"}}"#,
        )
        .unwrap();

        assert_eq!(config.ttl_seconds, 60);
        match config.storage {
            StorageConfig::Remote(remote) => {
                assert_eq!(remote.endpoint, "redis://cache:6379");
                assert_eq!(remote.timeout_ms, 1000);
            }
            other => panic!("expected remote storage, got {:?}", other),
        }

        let config: CacheConfig =
            serde_json::from_str(r#"{"storage": {"kind": "memory", "max_entries": 3}}"#).unwrap();
        assert_eq!(config.storage, StorageConfig::Memory(MemoryOptions { max_entries: 3 }));
    }

    #[test]
    fn test_from_lookup_memory() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_DEFAULT_TTL", "120"),
            ("CACHE_STORAGE_MEMORY_SIZE", "64"),
        ]))
        .unwrap();

        assert_eq!(config.ttl_seconds, 120);
        assert_eq!(config.storage, StorageConfig::Memory(MemoryOptions { max_entries: 64 }));
    }

    #[test]
    fn test_from_lookup_redis() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_STORAGE_TYPE", "redis"),
            ("REDIS_HOST", "cache.internal"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        match &config.storage {
            StorageConfig::Remote(remote) => {
                assert_eq!(remote.endpoint, "redis://cache.internal:6380");
                assert_eq!(remote.password.as_deref(), Some("hunter2"));
                assert!(!format!("{:?}", remote).contains("hunter2"));
            }
            other => panic!("expected remote storage, got {:?}", other),
        }
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(CacheConfig::from_lookup(lookup_from(&[("CACHE_DEFAULT_TTL", "soon")])).is_err());
        assert!(CacheConfig::from_lookup(lookup_from(&[("CACHE_STORAGE_TYPE", "disk")])).is_err());
        assert!(CacheConfig::from_lookup(lookup_from(&[("CACHE_DEFAULT_TTL", "0")])).is_err());
    }
}
