use crate::{CacheStore, Result, StoreError};

use std::{env, fmt, time::Duration};

use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio::sync::RwLock;

/// Environment variable holding the Redis connection string.
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Connection string used when [`REDIS_URL_ENV`] is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Number of keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 250;

/// Connection settings for [`RedisStore`].
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection string, e.g. `redis://localhost:6379/0`.
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: DEFAULT_REDIS_URL.to_string() }
    }
}

impl RedisConfig {
    /// Read the connection string from `REDIS_URL`, falling back to the
    /// local default when it is unset or empty.
    pub fn from_env() -> Self {
        env::var(REDIS_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| Self { url })
            .unwrap_or_default()
    }
}

/// Implements [`CacheStore`] with Redis.
///
/// Holds one long-lived [`ConnectionManager`] for the whole process, opened by
/// [`CacheStore::connect`] and dropped by [`CacheStore::disconnect`]. The
/// manager reconnects on its own after connection errors.
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub struct RedisStore {
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Create a store for `config`. No connection is made until
    /// [`CacheStore::connect`] is called.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        Ok(Self { client, connection: RwLock::new(None) })
    }

    /// Create a store from `REDIS_URL`.
    pub fn from_env() -> Result<Self> {
        Self::new(&RedisConfig::from_env())
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection.read().await.clone().ok_or(StoreError::NotConnected)
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        // PSETEX rejects a zero expiry.
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn.pset_ex(key, value, millis).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let count: u64 = conn.del(&keys).await?;
                removed += count;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let mut slot = self.connection.write().await;
        if slot.is_none() {
            let manager = ConnectionManager::new(self.client.clone()).await?;
            *slot = Some(manager);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connection.write().await.take();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
