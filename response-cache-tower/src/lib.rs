//! Server-side HTTP response caching middleware for Tower.
//!
//! This crate caches your own application's `GET` responses in a shared
//! key-value store so repeated reads skip the handler. It is a best-effort,
//! time-bounded staleness layer: entries live for the duration configured on
//! the route and are dropped early only by explicit invalidation.
//!
//! # Key Features
//!
//! - Handler-transparent: the response body is captured while it streams to
//!   the client, so handlers need no changes
//! - Query-order independent keys: `?a=1&b=2` and `?b=2&a=1` share an entry
//! - Fail-open: a broken store turns every request into a miss, never an error
//! - Pattern invalidation on writes, e.g. `invalidate("/api/products*")`
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use response_cache::{CacheOptions, MemoryStore};
//! use response_cache_tower::ResponseCache;
//! use tower::{Layer, Service, ServiceExt};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let cache = ResponseCache::new(MemoryStore::default());
//! let layer = cache.middleware(CacheOptions::new().duration_secs(300));
//!
//! let mut service = layer.layer(tower::service_fn(|_req: Request<Full<Bytes>>| async {
//!     Ok::<_, std::io::Error>(Response::new(Full::new(Bytes::from("[]"))))
//! }));
//!
//! let req = Request::get("/api/products?page=1").body(Full::default()).unwrap();
//! let res = service.ready().await.unwrap().call(req).await.unwrap();
//! assert_eq!(res.headers()["x-cache"], "MISS");
//! # });
//! ```
//!
//! # Shared Cache
//!
//! Cached responses are served to every client whose request resolves to the
//! same key. The default key only looks at the path and the query string, so
//! do not cache endpoints whose output depends on the caller unless a custom
//! [`KeyStrategy`](response_cache::KeyStrategy) puts the caller in the key.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod body;

pub use body::{CaptureBody, Commit, ResponseBody};

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use http::{header::HeaderValue, Request, Response};
use http_body::Body as HttpBody;
use response_cache::{
    glob_escape, BoxError, CacheEntry, CacheOptions, CacheStore, HeaderBag,
    HitOrMiss, StoreClient, KEY_PREFIX, XCACHE,
};
use tower::{Layer, Service};

/// Cache performance metrics.
///
/// Shared by every layer built from the same [`ResponseCache`].
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Number of requests answered from the cache.
    pub hits: AtomicU64,
    /// Number of eligible requests that reached the handler.
    pub misses: AtomicU64,
    /// Number of responses written to the store.
    pub stores: AtomicU64,
    /// Number of requests that went around the cache, either because they
    /// were not eligible or because their response could not be stored.
    pub bypassed: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// See [`CacheMetrics::hits`].
    pub hits: u64,
    /// See [`CacheMetrics::misses`].
    pub misses: u64,
    /// See [`CacheMetrics::stores`].
    pub stores: u64,
    /// See [`CacheMetrics::bypassed`].
    pub bypassed: u64,
}

impl CacheMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate cache hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Read all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.stores.store(0, Ordering::Relaxed);
        self.bypassed.store(0, Ordering::Relaxed);
    }
}

/// Entry point of the response cache: owns the store connection and hands
/// out per-route layers.
///
/// Construct one per process and share it; clones point at the same store
/// and the same metrics.
pub struct ResponseCache<S> {
    client: StoreClient<S>,
    metrics: Arc<CacheMetrics>,
}

impl<S> Clone for ResponseCache<S> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), metrics: self.metrics.clone() }
    }
}

impl<S> fmt::Debug for ResponseCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl<S: CacheStore> ResponseCache<S> {
    /// Create a cache over `store`.
    pub fn new(store: S) -> Self {
        Self::with_client(StoreClient::new(store))
    }

    /// Create a cache over an existing client, sharing its backend.
    pub fn with_client(client: StoreClient<S>) -> Self {
        Self { client, metrics: Arc::new(CacheMetrics::new()) }
    }

    /// The fail-open client used for every store call.
    pub fn store_client(&self) -> &StoreClient<S> {
        &self.client
    }

    /// Get a reference to the cache metrics.
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Build a layer caching the wrapped routes with `options`.
    pub fn middleware(&self, options: CacheOptions) -> CacheLayer<S> {
        CacheLayer {
            client: self.client.clone(),
            options: Arc::new(options),
            metrics: self.metrics.clone(),
        }
    }

    /// Open the store connection. Returns `false` if it failed; the cache
    /// then serves every request as a miss.
    pub async fn connect(&self) -> bool {
        self.client.connect().await
    }

    /// Release the store connection.
    pub async fn disconnect(&self) {
        self.client.disconnect().await
    }

    /// Remove every entry whose key matches `cache:` followed by the glob
    /// `pattern`, e.g. `"/api/products*"`. Returns how many were removed.
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        self.client.delete_matching(&format!("{KEY_PREFIX}{pattern}")).await
    }

    /// Remove the single entry stored under the full `key`.
    pub async fn invalidate_key(&self, key: &str) -> bool {
        self.client.delete_matching(&glob_escape(key)).await > 0
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        self.client.clear_all().await;
        log::debug!("cache cleared");
    }

    /// Returns `true` if the store answers.
    pub async fn health(&self) -> bool {
        self.client.ping().await
    }
}

/// Tower layer for server-side HTTP response caching.
///
/// Built by [`ResponseCache::middleware`]. Keys are derived from the
/// request's [`LogicalUri`](response_cache::LogicalUri) when one is set, so
/// a layer mounted inside a nested router still keys on the full path. With
/// the `axum` feature the URI axum records before nesting is used
/// automatically; elsewhere insert a `LogicalUri` in a layer that runs
/// before the router strips its prefix.
pub struct CacheLayer<S> {
    client: StoreClient<S>,
    options: Arc<CacheOptions>,
    metrics: Arc<CacheMetrics>,
}

impl<S> Clone for CacheLayer<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            options: self.options.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> fmt::Debug for CacheLayer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer").field("options", &self.options).finish()
    }
}

impl<S> CacheLayer<S> {
    /// Options applied by this layer.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }
}

impl<Inner, S> Layer<Inner> for CacheLayer<S> {
    type Service = CacheService<Inner, S>;

    fn layer(&self, inner: Inner) -> Self::Service {
        CacheService {
            inner,
            client: self.client.clone(),
            options: self.options.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Tower service that implements response caching.
pub struct CacheService<Inner, S> {
    inner: Inner,
    client: StoreClient<S>,
    options: Arc<CacheOptions>,
    metrics: Arc<CacheMetrics>,
}

impl<Inner: Clone, S> Clone for CacheService<Inner, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            client: self.client.clone(),
            options: self.options.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<Inner: fmt::Debug, S> fmt::Debug for CacheService<Inner, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("inner", &self.inner)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Marks a request already intercepted by a cache layer, so nested layers
/// pass it through.
#[derive(Debug, Clone, Copy)]
struct Intercepted;

/// Adopt the URI axum recorded before any `nest` stripped its prefix.
#[cfg(feature = "axum")]
fn adopt_original_uri(parts: &mut http::request::Parts) {
    use response_cache::LogicalUri;

    if parts.extensions.get::<LogicalUri>().is_some() {
        return;
    }
    if let Some(axum::extract::OriginalUri(uri)) =
        parts.extensions.get::<axum::extract::OriginalUri>().cloned()
    {
        parts.extensions.insert(LogicalUri(uri));
    }
}

#[cfg(not(feature = "axum"))]
fn adopt_original_uri(_parts: &mut http::request::Parts) {}

fn status_header(headers: &mut http::HeaderMap, status: HitOrMiss) {
    headers.insert(XCACHE, HeaderValue::from_static(status.as_str()));
}

impl<Inner, S, ReqBody, ResBody> Service<Request<ReqBody>>
    for CacheService<Inner, S>
where
    Inner: Service<Request<ReqBody>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    Inner::Error: Send + 'static,
    Inner::Future: Send + 'static,
    S: CacheStore,
    ReqBody: Send + 'static,
    ResBody: HttpBody + Send + 'static,
    ResBody::Data: Into<Bytes>,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = Inner::Error;
    type Future = Pin<
        Box<
            dyn Future<Output = Result<Self::Response, Self::Error>> + Send,
        >,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Keep the instance driven to readiness, hand a fresh clone back.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let client = self.client.clone();
        let options = self.options.clone();
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            adopt_original_uri(&mut parts);

            if parts.extensions.get::<Intercepted>().is_some()
                || !options.is_cacheable(&parts)
            {
                log::debug!("{} {} bypasses the cache", parts.method, parts.uri);
                metrics.bypassed.fetch_add(1, Ordering::Relaxed);
                let response =
                    inner.call(Request::from_parts(parts, body)).await?;
                return Ok(response.map(ResponseBody::passthrough));
            }

            let key = options.resolve_key(&parts);

            if let Some(entry) = client.get_entry(&key).await {
                match entry.into_response() {
                    Ok(mut response) => {
                        log::debug!("cache hit for {key}");
                        metrics.hits.fetch_add(1, Ordering::Relaxed);
                        if options.cache_status_headers {
                            status_header(response.headers_mut(), HitOrMiss::HIT);
                        }
                        return Ok(response.map(ResponseBody::cached));
                    }
                    Err(e) => {
                        log::debug!("ignoring unusable cache entry {key}: {e}")
                    }
                }
            }

            log::debug!("cache miss for {key}");
            metrics.misses.fetch_add(1, Ordering::Relaxed);
            parts.extensions.insert(Intercepted);
            let response = inner.call(Request::from_parts(parts, body)).await?;
            let (mut res_parts, body) = response.into_parts();

            // Stored headers never include our own status header.
            let status = res_parts.status;
            let headers = HeaderBag::from_header_map(&res_parts.headers);
            let ttl = options.duration;
            let commit: Commit = Box::new(move |bytes: Bytes| {
                let entry = match CacheEntry::new(status, headers, &bytes) {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::debug!("not caching response for {key}: {e}");
                        metrics.bypassed.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                };
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    log::warn!("no runtime to commit cache entry {key}");
                    return;
                };
                handle.spawn(async move {
                    if client.put_entry(key, &entry, ttl).await {
                        metrics.stores.fetch_add(1, Ordering::Relaxed);
                    }
                });
            });

            if options.cache_status_headers {
                status_header(&mut res_parts.headers, HitOrMiss::MISS);
            }
            let body = CaptureBody::new(body, options.max_body_size, commit);
            Ok(Response::from_parts(res_parts, ResponseBody::captured(body)))
        })
    }
}
