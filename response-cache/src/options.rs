use std::{fmt, sync::Arc, time::Duration};

use http::{request, Method};

use crate::key::KeyStrategy;

/// Time-to-live applied when a registration does not set one.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(300);

/// Largest body captured by default (8 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// A predicate deciding whether a request may use the cache.
pub type ConditionFn = Arc<dyn Fn(&request::Parts) -> bool + Send + Sync>;

/// Per-registration cache configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use response_cache::{CacheOptions, KeyStrategy};
///
/// let options = CacheOptions {
///     duration: Duration::from_secs(3600),
///     ..Default::default()
/// };
/// assert!(options.cache_status_headers);
///
/// let options = CacheOptions::new()
///     .duration_secs(60)
///     .key("cache:featured")
///     .condition(|parts| !parts.headers.contains_key("authorization"));
/// assert!(matches!(options.key, KeyStrategy::Static(_)));
/// ```
#[derive(Clone)]
pub struct CacheOptions {
    /// How long a stored entry stays servable.
    pub duration: Duration,
    /// How the cache key is derived.
    pub key: KeyStrategy,
    /// Extra eligibility predicate; `None` admits every GET request.
    pub condition: Option<ConditionFn>,
    /// Whether to add `X-Cache: HIT|MISS` to responses.
    pub cache_status_headers: bool,
    /// Bodies larger than this are delivered but not captured.
    pub max_body_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            key: KeyStrategy::Default,
            condition: None,
            cache_status_headers: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("duration", &self.duration)
            .field("key", &self.key)
            .field(
                "condition",
                &self.condition.as_ref().map(|_| "Fn(&request::Parts) -> bool"),
            )
            .field("cache_status_headers", &self.cache_status_headers)
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}

impl CacheOptions {
    /// Options with every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the time-to-live in seconds.
    pub fn duration_secs(self, secs: u64) -> Self {
        self.duration(Duration::from_secs(secs))
    }

    /// Override key derivation with a static key or a [`KeyStrategy`].
    pub fn key(mut self, key: impl Into<KeyStrategy>) -> Self {
        self.key = key.into();
        self
    }

    /// Restrict caching to requests matching `condition`.
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&request::Parts) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// The eligibility gate: only `GET` requests that satisfy the condition
    /// are cacheable. Other methods never are, whatever the condition says.
    pub fn is_cacheable(&self, parts: &request::Parts) -> bool {
        parts.method == Method::GET
            && self.condition.as_ref().is_none_or(|condition| condition(parts))
    }

    /// Resolve the cache key for a request.
    pub fn resolve_key(&self, parts: &request::Parts) -> String {
        self.key.resolve(parts)
    }
}
