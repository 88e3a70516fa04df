//! Admission middleware.
//!
//! [`AdmissionLayer`] wraps a service with one [`AdmissionPolicy`]. Layers
//! stack: each one counts the request against its own policy and either
//! forwards it or answers `429 Too Many Requests` itself.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use tower::{Layer, Service};
use tracing::{info, warn};

use super::context::RequestContext;
use crate::ratelimit::{AdmissionPolicy, LimitDecision};

/// Configured quota.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Quota left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Unix time, in seconds, when the current window ends.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Machine-readable code of a rejection.
pub const RATE_LIMITED_CODE: &str = "rate_limited";

/// Body of a `429` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitedBody {
    pub code: &'static str,
    pub message: String,
    pub status: u16,
}

/// Tower layer applying one admission policy.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    policy: Arc<AdmissionPolicy>,
}

impl AdmissionLayer {
    pub fn new(policy: Arc<AdmissionPolicy>) -> Self {
        Self { policy }
    }
}

impl From<AdmissionPolicy> for AdmissionLayer {
    fn from(policy: AdmissionPolicy) -> Self {
        Self::new(Arc::new(policy))
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    policy: Arc<AdmissionPolicy>,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();

        Box::pin(async move {
            let context = RequestContext::from_request(&request);

            let decision = match policy.check(&context.key_parts()).await {
                Ok(decision) => decision,
                Err(error) => {
                    // Fail open, without quota headers.
                    warn!(
                        limiter = policy.name(),
                        error = %error,
                        "Rate limit check failed, allowing request"
                    );
                    return inner.call(request).await;
                }
            };

            if decision.limited {
                let retry_after = decision.retry_after_secs(Utc::now());
                info!(
                    limiter = policy.name(),
                    scope = %policy.scope(),
                    client_ip = context.client_ip(),
                    user_id = context.user_id(),
                    endpoint = context.endpoint(),
                    method = %context.method(),
                    retry_after,
                    "Request rejected by rate limiter"
                );
                return Ok(rejection_response(&decision, retry_after));
            }

            let mut response = inner.call(request).await?;
            publish_quota_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

/// Attach quota headers for `decision`.
///
/// When an inner layer already published a quota, the one with fewer
/// requests remaining is kept so clients see the tightest constraint.
pub fn publish_quota_headers(headers: &mut HeaderMap, decision: &LimitDecision) {
    let existing = headers
        .get(&X_RATELIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok());
    if matches!(existing, Some(remaining) if remaining <= decision.remaining) {
        return;
    }

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_timestamp()));
}

/// Build the `429` response for a limited request.
pub fn rejection_response(decision: &LimitDecision, retry_after: u64) -> Response {
    let body = RateLimitedBody {
        code: RATE_LIMITED_CODE,
        message: format!("Rate limit exceeded, retry in {retry_after} seconds"),
        status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    publish_quota_headers(headers, decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
