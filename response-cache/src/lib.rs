#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_import_braces,
    unused_extern_crates,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Core of a fail-open HTTP response cache for read endpoints.
//!
//! This crate holds the pieces that do not depend on a server framework:
//!
//! - [`KeyStrategy`] and [`default_key`]: derive a stable key from a request,
//!   sorting query parameters so equivalent queries share an entry
//! - [`CacheOptions`]: per-route configuration and the eligibility gate
//!   (only `GET`, optionally narrowed by a condition)
//! - [`CacheEntry`]: the stored `{ statusCode, headers, body }` document
//! - [`CacheStore`]: the key-value backend contract, and [`StoreClient`],
//!   which logs backend failures and degrades them to misses or no-ops
//!
//! The Tower middleware built on top lives in `response-cache-tower`.
//!
//! ## Basic Usage
//!
//! ```rust
//! # #[cfg(feature = "manager-moka")]
//! # tokio_test_block_on(async {
//! use std::time::Duration;
//! use response_cache::{MemoryStore, StoreClient};
//!
//! let client = StoreClient::new(MemoryStore::default());
//! client
//!     .set_with_expiry("cache:/products:".into(), "{}".into(), Duration::from_secs(60))
//!     .await;
//! assert_eq!(client.get("cache:/products:").await.as_deref(), Some("{}"));
//! assert_eq!(client.delete_matching("cache:/products*").await, 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Features
//!
//! - `manager-moka` (default): enable [`MemoryStore`], an in-process backend
//! built on [moka](https://github.com/moka-rs/moka).
//! - `redis` (disabled): enable `RedisStore`, a backend built on
//! [redis](https://github.com/redis-rs/redis-rs) holding one managed connection.
mod entry;
mod error;
mod glob;
mod key;
mod managers;
mod options;
mod store;

use std::fmt;

pub use entry::{BodyEncoding, CacheEntry, HeaderBag, HeaderField};
pub use error::{BoxError, EntryError, Result, StoreError};
pub use glob::{glob_escape, glob_match};
pub use key::{
    default_key, logical_uri, query_params_key, sorted_query, KeyFn, KeyStrategy,
    LogicalUri, KEY_PREFIX,
};
pub use options::{
    CacheOptions, ConditionFn, DEFAULT_DURATION, DEFAULT_MAX_BODY_SIZE,
};
pub use store::{CacheStore, StoreClient};

#[cfg(feature = "manager-moka")]
pub use managers::moka::{MemoryStore, Stored};

#[cfg(feature = "redis")]
pub use managers::redis::{
    RedisConfig, RedisStore, DEFAULT_REDIS_URL, REDIS_URL_ENV,
};

/// `x-cache` header: HIT if the response was replayed from the cache, MISS if
/// the handler produced it
pub const XCACHE: &str = "x-cache";

/// Represents a basic cache status, written to the `x-cache` header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HitOrMiss {
    /// The response was replayed from the cache
    HIT,
    /// The handler produced the response
    MISS,
}

impl HitOrMiss {
    /// The header value for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HIT => "HIT",
            Self::MISS => "MISS",
        }
    }
}

impl fmt::Display for HitOrMiss {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
