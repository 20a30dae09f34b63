//! Boundary to the shared remote cache service.

use async_trait::async_trait;
use orderly_core::OrderlyResult;
use std::time::Duration;

/// One operation in a pipelined remote round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// Store `value` under `key`, expiring after `ttl`.
    SetWithExpiry {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// Delete the given keys.
    Delete { keys: Vec<String> },
}

/// Shared key/value store with server-side expiry.
///
/// Keys passed here are already namespaced. Implementations report failures
/// as errors; deciding that they are non-fatal is the caller's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetches a value.
    async fn get(&self, key: &str) -> OrderlyResult<Option<String>>;

    /// Stores a value with an expiry.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> OrderlyResult<()>;

    /// Deletes keys. Returns the number that existed.
    async fn delete(&self, keys: &[String]) -> OrderlyResult<u64>;

    /// Fetches many values in one round trip, in key order.
    async fn multi_get(&self, keys: &[String]) -> OrderlyResult<Vec<Option<String>>>;

    /// Lists keys matching a glob pattern (`*`, `?`, `[...]`).
    async fn keys_matching(&self, pattern: &str) -> OrderlyResult<Vec<String>>;

    /// Executes operations in one round trip.
    async fn pipeline(&self, ops: Vec<RemoteOp>) -> OrderlyResult<()>;

    /// Checks reachability.
    async fn ping(&self) -> OrderlyResult<()>;

    /// Whether the last interaction with the service succeeded.
    fn is_connected(&self) -> bool;
}
