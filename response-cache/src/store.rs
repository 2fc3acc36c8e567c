use std::{fmt, sync::Arc, time::Duration};

use crate::{entry::CacheEntry, error::Result};

/// A trait providing the key-value operations the response cache needs.
///
/// Implementations report failures; callers normally go through
/// [`StoreClient`], which turns every failure into a miss or a no-op.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Read the value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Store `value` under `key`, replacing any previous value, for `ttl`.
    async fn set_with_expiry(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> Result<()>;
    /// Remove every key matching the glob `pattern`; returns how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;
    /// Remove every key.
    async fn clear_all(&self) -> Result<()>;
    /// Open the connection to the backing service.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }
    /// Release the connection to the backing service.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
    /// Check the backing service is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Fail-open wrapper around a [`CacheStore`].
///
/// Every backend error is logged and then treated as absent data or a
/// no-op, so a broken store only costs the cache's benefit and never fails a
/// request. Cloning is cheap; clones share the same backend.
pub struct StoreClient<S> {
    store: Arc<S>,
}

impl<S> Clone for StoreClient<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone() }
    }
}

impl<S> fmt::Debug for StoreClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient").finish_non_exhaustive()
    }
}

impl<S: CacheStore> StoreClient<S> {
    /// Wrap a backend.
    pub fn new(store: S) -> Self {
        Self { store: Arc::new(store) }
    }

    /// The wrapped backend.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Open the backend connection. Returns `false` if it failed.
    pub async fn connect(&self) -> bool {
        match self.store.connect().await {
            Ok(()) => {
                log::debug!("cache store connected");
                true
            }
            Err(e) => {
                log::warn!("cache store connection failed: {e}");
                false
            }
        }
    }

    /// Release the backend connection.
    pub async fn disconnect(&self) {
        if let Err(e) = self.store.disconnect().await {
            log::warn!("cache store disconnect failed: {e}");
        }
    }

    /// Read a raw value. Errors read as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("cache read for {key} failed: {e}");
                None
            }
        }
    }

    /// Read and decode an entry. Malformed entries read as a miss and are
    /// overwritten by the next commit.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = self.get(key).await?;
        match CacheEntry::from_json(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("ignoring malformed cache entry {key}: {e}");
                None
            }
        }
    }

    /// Write a raw value with a time-to-live. Returns `false` if it failed.
    pub async fn set_with_expiry(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> bool {
        match self.store.set_with_expiry(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cache write failed: {e}");
                false
            }
        }
    }

    /// Encode and write an entry. Returns `false` if nothing was written.
    pub async fn put_entry(
        &self,
        key: String,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> bool {
        match entry.to_json() {
            Ok(value) => self.set_with_expiry(key, value, ttl).await,
            Err(e) => {
                log::error!("cache entry for {key} could not be serialized: {e}");
                false
            }
        }
    }

    /// Remove keys matching a glob pattern. Errors count as nothing removed.
    pub async fn delete_matching(&self, pattern: &str) -> u64 {
        match self.store.delete_matching(pattern).await {
            Ok(removed) => {
                log::debug!("removed {removed} cache entries matching {pattern}");
                removed
            }
            Err(e) => {
                log::warn!("cache invalidation of {pattern} failed: {e}");
                0
            }
        }
    }

    /// Remove every key.
    pub async fn clear_all(&self) {
        if let Err(e) = self.store.clear_all().await {
            log::warn!("cache clear failed: {e}");
        }
    }

    /// Returns `true` if the backend answers.
    pub async fn ping(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cache health check failed: {e}");
                false
            }
        }
    }
}
