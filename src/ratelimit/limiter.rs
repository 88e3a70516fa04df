//! Core rate limiter implementation.
//!
//! Fixed-window counting with the window anchored in the counter store: the
//! first request for a key starts the window, and the store expires the
//! counter when it ends. Each decision is a single atomic round trip.
//!
//! A caller can push up to twice the limit through across a window boundary:
//! a full quota at the end of one window and another at the start of the
//! next.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{Result, TollgateError};
use crate::store::{CounterStore, StoreError, MAX_WINDOW};

/// Quota settings for one limiter. Validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    limit: i64,
    window: Duration,
}

impl LimiterConfig {
    /// Create a configuration allowing `limit` requests per `window`.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Config`] if `limit` is not positive or
    /// `window` is zero or longer than [`MAX_WINDOW`].
    pub fn new(limit: i64, window: Duration) -> Result<Self> {
        if limit <= 0 {
            return Err(TollgateError::Config(format!(
                "limit must be positive, got {limit}"
            )));
        }
        if window.is_zero() {
            return Err(TollgateError::Config("window must be longer than zero".to_string()));
        }
        if window > MAX_WINDOW {
            return Err(TollgateError::Config(format!(
                "window of {}s exceeds the maximum of {}s",
                window.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        Ok(Self { limit, window })
    }

    /// Maximum requests per window.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// The outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDecision {
    /// Whether the request exceeded the quota.
    pub limited: bool,
    /// The configured quota.
    pub limit: i64,
    /// Requests left in the current window, never negative.
    pub remaining: i64,
    /// When the current window ends.
    pub reset_time: DateTime<Utc>,
}

impl LimitDecision {
    /// Window end as Unix seconds.
    pub fn reset_timestamp(&self) -> i64 {
        self.reset_time.timestamp()
    }

    /// Seconds a rejected caller should wait, rounded up and at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds();
        let secs = millis.saturating_add(999).div_euclid(1000);
        secs.max(1) as u64
    }
}

/// Applies the windowing algorithm on top of a [`CounterStore`].
///
/// Holds no mutable state of its own; all coordination happens in the
/// store, so one limiter can be shared freely across tasks and processes.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count one request against `key` and decide whether it is over `limit`.
    ///
    /// Store errors are returned as-is; whether to fail open or closed is up
    /// to the caller.
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the counter store.
    pub async fn check(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
    ) -> std::result::Result<LimitDecision, StoreError> {
        trace!(key, limit, window_ms = window.as_millis() as u64, "Checking rate limit");

        let snapshot = self.store.increment(key, window).await?;

        let now = Utc::now();
        let reset_time = chrono::Duration::from_std(snapshot.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let decision = LimitDecision {
            limited: snapshot.count > limit,
            limit,
            remaining: limit.saturating_sub(snapshot.count).max(0),
            reset_time,
        };

        if decision.limited {
            debug!(key, count = snapshot.count, limit, "Rate limit exceeded");
        }

        Ok(decision)
    }

    /// [`check`](Self::check) with the quota taken from a [`LimiterConfig`].
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] from the counter store.
    pub async fn check_with(
        &self,
        key: &str,
        config: &LimiterConfig,
    ) -> std::result::Result<LimitDecision, StoreError> {
        self.check(key, config.limit, config.window).await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
