//! Shared counter store adapters.
//!
//! The counter store is the only coordination point between Tollgate
//! instances. Every adapter exposes a single primitive: increment a counter
//! and, if this is the first write for the key, start its expiry. Adapters
//! must perform both steps atomically; a read-then-write sequence would let
//! two concurrent requests observe the same stale count.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::TollgateError;

pub use self::memory::{MemoryCounterStore, MIN_SWEEP_PERIOD};
pub use self::redis::RedisCounterStore;

/// Errors returned by counter store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the command or the connection failed.
    #[error("Counter store command failed: {0}")]
    Backend(#[from] ::redis::RedisError),

    /// The store did not answer within the configured bound.
    #[error("Counter store did not reply within {0:?}")]
    Timeout(Duration),

    /// The store answered with something other than `[count, ttl]`.
    #[error("Malformed counter store reply: {0}")]
    MalformedReply(String),

    /// The window is zero or longer than [`MAX_WINDOW`].
    #[error("Window of {0:?} is out of range")]
    WindowOutOfRange(Duration),
}

/// Longest window any counter store accepts.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Reject windows no backend can track.
pub(crate) fn check_window(window: Duration) -> Result<(), StoreError> {
    if window.is_zero() || window > MAX_WINDOW {
        return Err(StoreError::WindowOutOfRange(window));
    }
    Ok(())
}

/// The state of a counter immediately after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Value of the counter after this increment.
    pub count: i64,
    /// Remaining life of the current window.
    pub ttl: Duration,
}

/// Atomic increment-and-expire primitive.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key`.
    ///
    /// The first increment of a key sets its expiry to `window`. Later
    /// increments within the same window leave the expiry untouched, so the
    /// window stays anchored to first use.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on connectivity failures, timeouts,
    /// malformed replies, or a window outside `(0, MAX_WINDOW]`.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, StoreError>;
}

/// Build the counter store selected by `config`.
///
/// An unreachable Redis server does not fail this call; increments fail
/// until it comes back. The memory backend also starts its expiry sweeper,
/// which requires a running tokio runtime.
///
/// # Errors
///
/// Returns a configuration error if the Redis URL is invalid or the sweep
/// interval is zero.
pub async fn connect(config: &StoreConfig) -> crate::error::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisCounterStore::connect(&config.redis_url, config.timeout())
                .await
                .map_err(|e| TollgateError::Config(format!("store.redis_url: {e}")))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            if config.sweep_interval().is_zero() {
                return Err(TollgateError::Config(
                    "store.sweep_interval_secs must be positive".to_string(),
                ));
            }
            warn!("Using the in-memory counter store; limits are not shared between instances");
            let store = Arc::new(MemoryCounterStore::new());
            store.spawn_sweeper(config.sweep_interval());
            Ok(store as Arc<dyn CounterStore>)
        }
    }
}
