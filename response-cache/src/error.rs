use thiserror::Error;

/// Generic boxed error, used where inner services report their own failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` typedef defaulting to [`StoreError`]
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors reported by a [`CacheStore`](crate::CacheStore) backend.
///
/// These never reach a client: [`StoreClient`](crate::StoreClient) logs them
/// and degrades to a cache miss or a no-op.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store has not been connected yet, or was disconnected.
    #[error("cache store is not connected")]
    NotConnected,
    /// The Redis backend failed.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Any other backend failure.
    #[error("cache store error: {0}")]
    Backend(String),
}

/// Errors raised while capturing a response into a [`CacheEntry`](crate::CacheEntry)
/// or reading one back.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EntryError {
    /// The body is not UTF-8 and cannot be stored as JSON.
    #[error("response body is not valid UTF-8")]
    BinaryBody,
    /// The response declares a JSON content type but its body does not parse.
    #[error("response declared as JSON does not parse")]
    InvalidJson(#[source] serde_json::Error),
    /// The stored value is not a well formed entry.
    #[error("stored entry is malformed")]
    Malformed(#[source] serde_json::Error),
    /// The entry could not be serialized for storage.
    #[error("failed to serialize entry")]
    Serialize(#[source] serde_json::Error),
    /// The stored status code is outside the valid range.
    #[error("stored status code {0} is invalid")]
    InvalidStatus(u16),
}
