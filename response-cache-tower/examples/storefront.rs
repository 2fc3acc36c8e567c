//! Storefront catalog API with cached read endpoints.
//!
//! ```bash
//! # Start the server
//! RUST_LOG=debug cargo run --example storefront
//!
//! curl -i http://localhost:3000/api/products?category=fruit   # MISS
//! curl -i http://localhost:3000/api/products?category=fruit   # HIT
//! curl -i -X POST http://localhost:3000/api/products \
//!      -H 'content-type: application/json' \
//!      -d '{"name":"kiwi","category":"fruit","price":120}'     # invalidates products
//! curl -i http://localhost:3000/api/categories                # cached for an hour
//! curl http://localhost:3000/admin/cache/metrics
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use response_cache::{CacheOptions, MemoryStore};
use response_cache_tower::ResponseCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    #[serde(default)]
    id: u64,
    name: String,
    category: String,
    price: u64,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    category: Option<String>,
}

#[derive(Clone)]
struct AppState {
    cache: ResponseCache<MemoryStore>,
    products: Arc<RwLock<Vec<Product>>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cache = ResponseCache::new(MemoryStore::default());
    if !cache.connect().await {
        tracing::warn!("cache store unavailable, serving without cache");
    }

    let state = AppState {
        cache: cache.clone(),
        products: Arc::new(RwLock::new(seed())),
    };

    let products = Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route("/api/products/{id}", get(get_product))
        .route_layer(cache.middleware(CacheOptions::new().duration_secs(300)));

    let categories = Router::new()
        .route("/api/categories", get(list_categories))
        .route_layer(cache.middleware(CacheOptions::new().duration_secs(3600)));

    let admin = Router::new()
        .route("/admin/cache/metrics", get(cache_metrics))
        .route("/admin/cache/clear", post(clear_cache))
        .route("/health", get(health));

    let app = products.merge(categories).merge(admin).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("storefront listening on http://localhost:3000");
    axum::serve(listener, app).await?;

    cache.disconnect().await;
    Ok(())
}

fn seed() -> Vec<Product> {
    [
        ("apple", "fruit", 90),
        ("pear", "fruit", 110),
        ("carrot", "vegetable", 40),
    ]
    .into_iter()
    .zip(1..)
    .map(|((name, category, price), id)| Product {
        id,
        name: name.into(),
        category: category.into(),
        price,
    })
    .collect()
}

async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Product>> {
    let products = state.products.read().await;
    let selected = products
        .iter()
        .filter(|p| query.category.as_ref().is_none_or(|c| &p.category == c))
        .cloned()
        .collect();
    Json(selected)
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Product>, StatusCode> {
    let products = state.products.read().await;
    products
        .iter()
        .find(|p| p.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_product(
    State(state): State<AppState>,
    Json(mut product): Json<Product>,
) -> impl IntoResponse {
    {
        let mut products = state.products.write().await;
        product.id = products.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        products.push(product.clone());
    }
    let removed = state.cache.invalidate("/api/products*").await;
    tracing::info!(id = product.id, removed, "product created");
    (StatusCode::CREATED, Json(product))
}

async fn list_categories(State(state): State<AppState>) -> Json<Vec<String>> {
    let products = state.products.read().await;
    let mut categories: Vec<String> =
        products.iter().map(|p| p.category.clone()).collect();
    categories.sort();
    categories.dedup();
    Json(categories)
}

async fn cache_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let metrics = state.cache.metrics();
    let snapshot = metrics.snapshot();
    Json(serde_json::json!({
        "hits": snapshot.hits,
        "misses": snapshot.misses,
        "stores": snapshot.stores,
        "bypassed": snapshot.bypassed,
        "hitRate": metrics.hit_rate(),
    }))
}

async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.cache.clear().await;
    state.cache.metrics().reset();
    StatusCode::NO_CONTENT
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let cache = state.cache.health().await;
    let status = if cache { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "cache": cache })))
}
