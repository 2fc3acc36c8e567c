//! Cache key resolution.

use std::{fmt, sync::Arc};

use http::{request, Uri};
use url::form_urlencoded;

/// Namespace prepended to every key built by the default resolver.
pub const KEY_PREFIX: &str = "cache:";

/// A function deriving a cache key from request parts.
pub type KeyFn = Arc<dyn Fn(&request::Parts) -> String + Send + Sync>;

/// How a registration derives the key for a request.
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// `cache:{path}:{query sorted by name}`.
    #[default]
    Default,
    /// The same key for every request, regardless of path or query.
    Static(String),
    /// A caller supplied function; its result is used unmodified.
    Custom(KeyFn),
}

impl KeyStrategy {
    /// Wrap a key-deriving function.
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&request::Parts) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(func))
    }

    /// Resolve the key for a request.
    pub fn resolve(&self, parts: &request::Parts) -> String {
        match self {
            Self::Default => default_key(parts),
            Self::Static(key) => key.clone(),
            Self::Custom(func) => func(parts),
        }
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Static(key) => f.debug_tuple("Static").field(key).finish(),
            Self::Custom(_) => f.write_str("Custom(Fn(&request::Parts) -> String)"),
        }
    }
}

impl From<&str> for KeyStrategy {
    fn from(key: &str) -> Self {
        Self::Static(key.to_string())
    }
}

impl From<String> for KeyStrategy {
    fn from(key: String) -> Self {
        Self::Static(key)
    }
}

/// The URI a request had before any router stripped a mount prefix from it.
///
/// Key strategies read the path and query from this request extension when
/// it is present, so services nested under different prefixes that share a
/// store get distinct keys. Insert it in a layer that runs before nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalUri(pub Uri);

/// The URI keys are derived from: the [`LogicalUri`] extension if set,
/// otherwise the request URI.
pub fn logical_uri(parts: &request::Parts) -> &Uri {
    parts
        .extensions
        .get::<LogicalUri>()
        .map_or(&parts.uri, |logical| &logical.0)
}

/// Build the default key for a request.
///
/// # Example
///
/// ```
/// # use http::Request;
/// # use response_cache::default_key;
/// let a = Request::get("/products?sort=price&category=fruit").body(()).unwrap();
/// let b = Request::get("/products?category=fruit&sort=price").body(()).unwrap();
/// let key = default_key(&a.into_parts().0);
/// assert_eq!(key, "cache:/products:category=fruit&sort=price");
/// assert_eq!(key, default_key(&b.into_parts().0));
/// ```
pub fn default_key(parts: &request::Parts) -> String {
    let uri = logical_uri(parts);
    format!(
        "{KEY_PREFIX}{}:{}",
        uri.path(),
        sorted_query(uri.query().unwrap_or_default())
    )
}

/// Canonicalize a query string: parameters are sorted by name while repeated
/// parameters keep their relative order, and every pair is re-encoded in
/// `application/x-www-form-urlencoded` form.
pub fn sorted_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> =
        form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    // `sort_by` is stable.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish()
}

/// Key only on a subset of the query parameters.
///
/// Parameters not listed are ignored, so `/products?page=2&utm=x` and
/// `/products?page=2` share an entry when only `page` is listed. A parameter
/// given once with an empty value is skipped. A parameter given several
/// times keys on all of its values joined with `,` in request order.
///
/// ```
/// # use http::Request;
/// # use response_cache::query_params_key;
/// let strategy = query_params_key(["page", "category"]);
/// let req = Request::get("/products?utm=mail&page=2").body(()).unwrap();
/// assert_eq!(strategy.resolve(&req.into_parts().0), "cache:/products:page=2");
/// ```
pub fn query_params_key<I, S>(names: I) -> KeyStrategy
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    KeyStrategy::custom(move |parts| {
        let uri = logical_uri(parts);
        let query = uri.query().unwrap_or_default();
        let mut selected: Vec<(String, String)> = Vec::new();
        for name in &names {
            let values: Vec<_> = form_urlencoded::parse(query.as_bytes())
                .filter(|(k, _)| k == name)
                .map(|(_, v)| v)
                .collect();
            match values.as_slice() {
                [] => {}
                [only] if only.is_empty() => {}
                _ => selected.push((name.clone(), values.join(","))),
            }
        }
        selected.sort_by(|a, b| a.0.cmp(&b.0));
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(selected)
            .finish();
        format!("{KEY_PREFIX}{}:{query}", uri.path())
    })
}
