//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::routing::{get, post};
use axum::Router;

use tollgate::http::{AdmissionLayer, AuthenticatedUser, X_FORWARDED_FOR};
use tollgate::ratelimit::{AdmissionPolicy, LimiterConfig, RateLimiter, Scope};
use tollgate::store::{CounterSnapshot, CounterStore, MemoryCounterStore, StoreError};

/// A store that is always down.
pub struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<CounterSnapshot, StoreError> {
        Err(StoreError::Timeout(Duration::from_millis(100)))
    }
}

pub fn memory_limiter() -> RateLimiter {
    RateLimiter::new(Arc::new(MemoryCounterStore::new()))
}

pub fn policy(
    name: &str,
    scope: Scope,
    limit: i64,
    window: Duration,
    limiter: RateLimiter,
) -> Arc<AdmissionPolicy> {
    let config = LimiterConfig::new(limit, window).expect("valid limiter config");
    AdmissionPolicy::new(name, scope, config, limiter).into_shared()
}

/// Router with a few endpoints behind `policies`, outermost first.
/// `hits` counts requests that reached a handler.
pub fn guarded_router(policies: &[Arc<AdmissionPolicy>], hits: Arc<AtomicUsize>) -> Router {
    let orders_hits = hits.clone();
    let items_hits = hits;

    let mut router = Router::new()
        .route(
            "/orders",
            post(move || {
                let hits = orders_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "created"
                }
            }),
        )
        .route(
            "/items/{id}",
            get(move || {
                let hits = items_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "item"
                }
            }),
        );

    for policy in policies.iter().rev() {
        router = router.layer(AdmissionLayer::new(policy.clone()));
    }
    router
}

/// Build a request from `ip`, optionally authenticated as `user`.
pub fn request(method: Method, uri: &str, ip: &str, user: Option<&str>) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(X_FORWARDED_FOR, ip)
        .body(Body::empty())
        .expect("valid request");

    if let Some(user) = user {
        request
            .extensions_mut()
            .insert(AuthenticatedUser(user.to_string()));
    }
    request
}

pub fn header_i64(response: &axum::response::Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}
