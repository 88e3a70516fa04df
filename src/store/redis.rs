//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use tokio::sync::OnceCell;
use tracing::{info, trace, warn};

use super::{check_window, CounterSnapshot, CounterStore, StoreError};

/// Increments `KEYS[1]` and returns `{count, pttl}`.
///
/// The expiry is only set on the first increment. A key that somehow lost its
/// TTL (written by another client, or `PERSIST`ed) gets one again so a counter
/// can never outlive its window forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Counter store speaking to a Redis (or protocol-compatible) server.
///
/// The connection is established on first use and then multiplexed and
/// reconnected on its own, so one store can be shared by every request
/// task. Until the server is reachable every increment fails, which the
/// admission layer turns into admitted requests.
pub struct RedisCounterStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    script: Script,
    timeout: Duration,
}

impl RedisCounterStore {
    /// Create a store for the Redis server at `url`.
    ///
    /// One connection attempt is made up front, bounded by `timeout`. A
    /// server that is down is logged and retried on later increments; it
    /// never fails construction. `timeout` also bounds every increment.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the URL is invalid.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let store = Self {
            client,
            connection: OnceCell::new(),
            script: Script::new(INCREMENT_SCRIPT),
            timeout,
        };

        match tokio::time::timeout(timeout, store.connection()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Counter store unreachable, admitting requests until it recovers")
            }
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Counter store did not answer, admitting requests until it recovers"
            ),
        }

        Ok(store)
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// The shared connection, opening it if no attempt has succeeded yet.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = ConnectionManager::new(self.client.clone()).await?;
                info!(timeout_ms = self.timeout.as_millis() as u64, "Connected to Redis counter store");
                Ok::<_, StoreError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    async fn run_script(&self, key: &str, window: Duration) -> Result<Value, StoreError> {
        let mut connection = self.connection().await?;
        let mut invocation = self.script.key(key);
        invocation.arg(window_millis(window));

        // EVALSHA, falling back to EVAL when the script cache is cold.
        Ok(invocation.invoke_async(&mut connection).await?)
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connected", &self.is_connected())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, StoreError> {
        check_window(window)?;

        // Connecting counts against the same bound as the command.
        let reply = tokio::time::timeout(self.timeout, self.run_script(key, window))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;

        let snapshot = parse_reply(reply)?;
        trace!(key, count = snapshot.count, ttl_ms = snapshot.ttl.as_millis() as u64, "Incremented counter");
        Ok(snapshot)
    }
}

/// Window length in milliseconds as accepted by `PEXPIRE`.
fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}

/// Decode the `{count, ttl}` array produced by [`INCREMENT_SCRIPT`].
fn parse_reply(reply: Value) -> Result<CounterSnapshot, StoreError> {
    let items = match reply {
        Value::Array(items) => items,
        other => {
            return Err(StoreError::MalformedReply(format!(
                "expected an array of two integers, got {other:?}"
            )))
        }
    };

    match items.as_slice() {
        [Value::Int(count), Value::Int(ttl)] if *count >= 1 && *ttl >= 0 => Ok(CounterSnapshot {
            count: *count,
            ttl: Duration::from_millis(*ttl as u64),
        }),
        [Value::Int(count), Value::Int(ttl)] => Err(StoreError::MalformedReply(format!(
            "counter {count} with ttl {ttl}ms is out of range"
        ))),
        other => Err(StoreError::MalformedReply(format!(
            "expected an array of two integers, got {other:?}"
        ))),
    }
}
