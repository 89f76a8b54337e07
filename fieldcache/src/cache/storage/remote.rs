//! Redis-backed store
//!
//! Entries are stored as JSON documents under `SET EX`, so the server drops
//! them when their TTL lapses. The stored value embeds the deadline and is
//! re-checked on read to cover clock rounding on the server side.
//!
//! Tags live next to the entries: every tag is a set of entry keys under
//! `{prefix}__tag:{tag}`, lasting as long as its longest-lived member. Stores
//! and purges run as server-side scripts, so a purge from any process sees
//! every entry stored before it.

use super::StorageBackend;
use crate::cache::config::{RemoteOptions, MAX_TTL_SECONDS};
use crate::cache::entry::CacheEntry;
use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo, Script};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// KEYS[1] entry, KEYS[2..] tag sets; ARGV[1] payload, ARGV[2] TTL seconds
const STORE_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[2])
redis.call('SET', KEYS[1], ARGV[1], 'EX', ttl)
for i = 2, #KEYS do
  redis.call('SADD', KEYS[i], KEYS[1])
  if redis.call('TTL', KEYS[i]) < ttl then
    redis.call('EXPIRE', KEYS[i], ttl)
  end
end
return 1
"#;

/// KEYS[1] tag set; returns how many member entries were deleted
const PURGE_SCRIPT: &str = r#"
local members = redis.call('SMEMBERS', KEYS[1])
redis.call('DEL', KEYS[1])
local removed = 0
for i = 1, #members, 500 do
  removed = removed + redis.call('DEL', unpack(members, i, math.min(i + 499, #members)))
end
return removed
"#;

const TAG_NAMESPACE: &str = "__tag:";

const CLEAR_BATCH: usize = 500;

/// Store shared by every process pointing at the same endpoint and prefix
pub struct RemoteStore {
    connection: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
    endpoint: String,
    store_script: Script,
    purge_script: Script,
}

impl RemoteStore {
    /// Open a managed connection, failing if the server cannot be reached in time
    pub async fn connect(options: &RemoteOptions) -> Result<Self> {
        let mut info = options
            .endpoint
            .as_str()
            .into_connection_info()
            .map_err(|e| CacheError::ConfigError(format!("invalid redis endpoint: {}", e)))?;

        if options.username.is_some() {
            info.redis.username = options.username.clone();
        }
        if options.password.is_some() {
            info.redis.password = options.password.clone();
        }

        let endpoint = info.addr.to_string();
        info!("Connecting to remote cache store at {}", endpoint);

        let client = redis::Client::open(info)?;
        let timeout = options.timeout();
        let connection = with_timeout(timeout, "connect", ConnectionManager::new(client)).await?;

        Ok(Self {
            connection,
            key_prefix: options.key_prefix.clone(),
            timeout,
            endpoint,
            store_script: Script::new(STORE_SCRIPT),
            purge_script: Script::new(PURGE_SCRIPT),
        })
    }

    /// Server address, without credentials
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        tag_key(&self.key_prefix, tag)
    }
}

fn tag_key(prefix: &str, tag: &str) -> String {
    format!("{}{}{}", prefix, TAG_NAMESPACE, tag)
}

/// `EX` seconds for a remaining lifetime
///
/// Rounded up so a live entry never reaches zero, capped at the longest TTL
/// the configuration accepts.
fn expire_seconds(remaining: Duration) -> u64 {
    let seconds = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    seconds.clamp(1, MAX_TTL_SECONDS)
}

#[async_trait]
impl StorageBackend for RemoteStore {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> =
            with_timeout(self.timeout, "get", connection.get(self.storage_key(key))).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let entry: CacheEntry = serde_json::from_str(&raw)
            .map_err(|e| CacheError::StorageRead(format!("corrupt entry {}: {}", key, e)))?;

        if entry.is_expired() {
            debug!("Cache entry expired: {}", key);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let Some(remaining) = entry.time_until_expiration() else {
            debug!("Skipping write of already expired entry: {}", entry.key);
            return Ok(());
        };
        let seconds = expire_seconds(remaining);
        let payload = serde_json::to_string(&entry)?;

        let mut invocation = self.store_script.prepare_invoke();
        invocation.key(self.storage_key(&entry.key));
        for tag in &entry.tags {
            invocation.key(self.tag_key(tag));
        }
        invocation.arg(payload).arg(seconds);

        let mut connection = self.connection.clone();
        let _: i64 = with_timeout(self.timeout, "set", invocation.invoke_async(&mut connection))
            .await
            .map_err(|e| CacheError::StorageWrite(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let removed: usize =
            with_timeout(self.timeout, "delete", connection.del(self.storage_key(key))).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let storage_keys: Vec<String> = keys.iter().map(|key| self.storage_key(key)).collect();
        let mut connection = self.connection.clone();
        with_timeout(self.timeout, "delete_many", connection.del(storage_keys)).await
    }

    /// Delete every key under this store's prefix, tag sets included
    ///
    /// Refused without a prefix, since the keyspace may be shared.
    async fn clear(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(CacheError::ConfigError(
                "refusing to clear a remote store without key_prefix".to_string(),
            ));
        }

        let pattern = format!("{}*", self.key_prefix);
        let mut scan = self.connection.clone();
        let keys: Vec<String> = with_timeout(self.timeout, "clear", async move {
            let mut iter = scan.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok::<_, redis::RedisError>(keys)
        })
        .await?;

        let mut connection = self.connection.clone();

        for chunk in keys.chunks(CLEAR_BATCH) {
            let _: usize =
                with_timeout(self.timeout, "clear", connection.del(chunk.to_vec())).await?;
        }
        info!("Cleared {} entries from remote store", keys.len());
        Ok(())
    }

    fn tracks_tags(&self) -> bool {
        true
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        let mut invocation = self.purge_script.prepare_invoke();
        invocation.key(self.tag_key(tag));

        let mut connection = self.connection.clone();
        with_timeout(self.timeout, "invalidate_tag", invocation.invoke_async(&mut connection)).await
    }
}

async fn with_timeout<T, F>(timeout: Duration, context: &str, future: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(CacheError::from),
        Err(_) => Err(CacheError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
            context: context.to_string(),
        }),
    }
}
