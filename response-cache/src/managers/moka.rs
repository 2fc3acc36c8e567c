use crate::{glob::glob_match, CacheStore, Result};

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use moka::{future::Cache, Expiry};

/// Implements [`CacheStore`] in process with [`moka`](https://github.com/moka-rs/moka).
///
/// Each entry expires after the TTL it was written with. Useful for a
/// single-process deployment and for tests.
#[cfg_attr(docsrs, doc(cfg(feature = "manager-moka")))]
#[derive(Clone)]
pub struct MemoryStore {
    /// The instance of `moka::future::Cache`
    pub cache: Arc<Cache<String, Stored>>,
}

/// A stored value and the TTL it was written with.
#[derive(Debug, Clone)]
pub struct Stored {
    value: Arc<str>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Stored> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Stored,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    // A rewrite replaces the entry, including its lifetime.
    fn expire_after_update(
        &self,
        _key: &String,
        value: &Stored,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MemoryStore {
    /// Create a store holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache: Arc::new(cache) }
    }

    /// Keys currently live in the store.
    pub fn keys(&self) -> Vec<String> {
        self.cache.iter().map(|(key, _)| key.as_ref().clone()).collect()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|stored| stored.value.to_string()))
    }

    async fn set_with_expiry(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> Result<()> {
        let stored = Stored { value: value.into(), ttl };
        self.cache.insert(key, stored).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let matching: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key)
            .collect();
        for key in &matching {
            self.cache.invalidate(key.as_str()).await;
        }
        self.cache.run_pending_tasks().await;
        Ok(matching.len() as u64)
    }

    async fn clear_all(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}
