//! End-to-end admission behaviour through an axum router.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use common::{guarded_router, header_i64, memory_limiter, policy, request, UnavailableStore};
use tollgate::http::RequestContext;
use tollgate::ratelimit::{AdmissionPolicy, LimiterConfig, RateLimiter, Scope};
use tollgate::store::RedisCounterStore;

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_five_per_minute_scenario() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = policy("per_ip", Scope::Ip, 5, MINUTE, memory_limiter());
    let router = guarded_router(&[limiter], hits.clone());

    for expected_remaining in [4, 3, 2, 1, 0] {
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_i64(&response, "x-ratelimit-limit"), Some(5));
        assert_eq!(
            header_i64(&response, "x-ratelimit-remaining"),
            Some(expected_remaining)
        );
        assert!(response.headers().get("retry-after").is_none());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);

    let before = Utc::now().timestamp();
    let response = router
        .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_i64(&response, "x-ratelimit-limit"), Some(5));
    assert_eq!(header_i64(&response, "x-ratelimit-remaining"), Some(0));

    let retry_after = header_i64(&response, "retry-after").unwrap();
    assert!((1..=60).contains(&retry_after), "retry-after {retry_after}");

    let reset = header_i64(&response, "x-ratelimit-reset").unwrap();
    assert!(reset >= before && reset <= before + 61, "reset {reset}");

    // The handler was not called for the rejected request.
    assert_eq!(hits.load(Ordering::SeqCst), 5);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "rate_limited");
    assert_eq!(json["status"], 429);
    assert!(json["message"].as_str().unwrap().contains("Rate limit exceeded"));
}

#[tokio::test(start_paused = true)]
async fn test_window_expiry_starts_fresh_quota() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = policy("per_ip", Scope::Ip, 5, MINUTE, memory_limiter());
    let router = guarded_router(&[limiter], hits);

    for _ in 0..6 {
        router
            .clone()
            .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
            .await
            .unwrap();
    }

    tokio::time::advance(MINUTE + Duration::from_millis(1)).await;

    let response = router
        .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_i64(&response, "x-ratelimit-remaining"), Some(4));
}

#[tokio::test]
async fn test_endpoint_quota_is_shared_between_users() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = policy("orders", Scope::Endpoint, 100, MINUTE, memory_limiter());
    let router = guarded_router(&[limiter], hits.clone());

    for i in 0..100 {
        let (user, ip) = if i % 2 == 0 {
            ("alice", "198.51.100.1")
        } else {
            ("bob", "198.51.100.2")
        };
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/orders", ip, Some(user)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {}", i + 1);
    }

    for (user, ip) in [("alice", "198.51.100.1"), ("bob", "198.51.100.2")] {
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/orders", ip, Some(user)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 100);

    // A different endpoint has its own quota.
    let response = router
        .oneshot(request(Method::GET, "/items/7", "198.51.100.1", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_route_pattern_groups_paths() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = policy("items", Scope::Endpoint, 1, MINUTE, memory_limiter());
    let router = guarded_router(&[limiter], hits);

    let first = router
        .clone()
        .oneshot(request(Method::GET, "/items/1", "192.0.2.1", None))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Same route, different path parameter: same endpoint quota.
    let second = router
        .oneshot(request(Method::GET, "/items/2", "192.0.2.1", None))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_store_outage_fails_open_without_headers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let broken = RateLimiter::new(Arc::new(UnavailableStore));
    let limiter = policy("per_ip", Scope::Ip, 1, MINUTE, broken);
    let router = guarded_router(&[limiter], hits.clone());

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
        assert!(response.headers().get("x-ratelimit-reset").is_none());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreachable_redis_admits_without_headers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let store = RedisCounterStore::connect("redis://127.0.0.1:1", Duration::from_millis(200))
        .await
        .unwrap();
    assert!(!store.is_connected());

    let limiter = policy("per_ip", Scope::Ip, 1, MINUTE, RateLimiter::new(Arc::new(store)));
    let router = guarded_router(&[limiter], hits.clone());

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_anonymous_user_scope_shares_ip_counter() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = memory_limiter();
    let config = LimiterConfig::new(10, MINUTE).unwrap();
    let by_ip =
        AdmissionPolicy::new("ip", Scope::Ip, config, limiter.clone()).with_namespace("shared");
    let by_user =
        AdmissionPolicy::new("user", Scope::User, config, limiter).with_namespace("shared");

    let anonymous = request(Method::POST, "/orders", "203.0.113.9", None);
    let context = RequestContext::from_request(&anonymous);
    assert_eq!(by_user.key(&context.key_parts()), by_ip.key(&context.key_parts()));

    let signed_in = request(Method::POST, "/orders", "203.0.113.9", Some("dave"));
    let context = RequestContext::from_request(&signed_in);
    assert_ne!(by_user.key(&context.key_parts()), by_ip.key(&context.key_parts()));

    // Anonymous callers behind different addresses get separate quotas.
    let router = guarded_router(&[by_user.into_shared()], hits);
    for ip in ["203.0.113.9", "203.0.113.10"] {
        let response = router
            .clone()
            .oneshot(request(Method::POST, "/orders", ip, None))
            .await
            .unwrap();
        assert_eq!(header_i64(&response, "x-ratelimit-remaining"), Some(9));
    }
}

#[tokio::test]
async fn test_chained_limiters_publish_tightest_quota() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = memory_limiter();
    let per_ip = policy("per_ip", Scope::Ip, 100, MINUTE, limiter.clone());
    let per_user_endpoint = policy("checkout", Scope::UserEndpoint, 2, MINUTE, limiter);
    let router = guarded_router(&[per_ip, per_user_endpoint], hits.clone());

    let first = router
        .clone()
        .oneshot(request(Method::POST, "/orders", "203.0.113.1", Some("alice")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_i64(&first, "x-ratelimit-limit"), Some(2));
    assert_eq!(header_i64(&first, "x-ratelimit-remaining"), Some(1));

    router
        .clone()
        .oneshot(request(Method::POST, "/orders", "203.0.113.1", Some("alice")))
        .await
        .unwrap();

    // The inner limiter rejects; the outer one still counted the request.
    let third = router
        .clone()
        .oneshot(request(Method::POST, "/orders", "203.0.113.1", Some("alice")))
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_i64(&third, "x-ratelimit-limit"), Some(2));
    assert_eq!(header_i64(&third, "x-ratelimit-remaining"), Some(0));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Another user from the same address still has endpoint quota.
    let other = router
        .oneshot(request(Method::POST, "/orders", "203.0.113.1", Some("bob")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(header_i64(&other, "x-ratelimit-remaining"), Some(1));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_requests_admit_exactly_the_limit() {
    let hits = Arc::new(AtomicUsize::new(0));
    let limiter = policy("per_ip", Scope::Ip, 10, MINUTE, memory_limiter());
    let router = guarded_router(&[limiter], hits.clone());

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .oneshot(request(Method::POST, "/orders", "203.0.113.1", None))
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(rejected, 40);
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}
