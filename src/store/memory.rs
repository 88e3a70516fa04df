//! In-process counter store.
//!
//! Suitable for single-instance deployments and tests. Counters live in a
//! sharded map; the shard lock held by an entry guard makes each increment
//! atomic with respect to other tasks in this process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{check_window, CounterSnapshot, CounterStore, StoreError};

/// Shortest period accepted by [`MemoryCounterStore::spawn_sweeper`].
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: i64,
    expires_at: Instant,
}

/// A counter store kept in local memory.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every counter whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.slots.retain(|_, slot| {
            let live = slot.expires_at > now;
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    /// Periodically purge expired counters, at most once per
    /// [`MIN_SWEEP_PERIOD`].
    ///
    /// The task holds only a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let period = period.max(MIN_SWEEP_PERIOD);
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "Swept expired counters");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, StoreError> {
        check_window(window)?;
        let now = Instant::now();

        let mut slot = self.slots.entry(key.to_owned()).or_insert(Slot {
            count: 0,
            expires_at: now + window,
        });

        if slot.expires_at <= now {
            *slot = Slot {
                count: 0,
                expires_at: now + window,
            };
        }
        slot.count += 1;

        Ok(CounterSnapshot {
            count: slot.count,
            ttl: slot.expires_at.saturating_duration_since(now),
        })
    }
}
