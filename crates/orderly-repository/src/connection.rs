//! Boundary to the relational connection pool.
//!
//! The executor only sees these traits; [`crate::pool`] adapts SQLx to them.
//! A borrowed connection lives inside a [`PooledConnection`] guard, which
//! releases it exactly once: explicitly, or on drop for every other exit
//! path (errors, early returns, cancelled futures). A guard marked
//! [`PooledConnection::discard_on_drop`] closes the connection instead, so
//! session state such as an open transaction never reaches the next borrower.

use crate::row::RowSet;
use async_trait::async_trait;
use orderly_core::{OrderlyError, OrderlyResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A single connection borrowed from the pool.
#[async_trait]
pub trait Connection: Send {
    /// Runs `statement` with positional `params` (`$1`, `$2`, ...).
    async fn query(&mut self, statement: &str, params: &[Value]) -> OrderlyResult<RowSet>;

    /// Bounds every following statement on this connection to `timeout`.
    async fn set_statement_timeout(&mut self, timeout: Duration) -> OrderlyResult<()>;

    /// Returns the connection to its pool.
    fn release(&mut self);

    /// Closes the connection without returning it to the pool.
    fn discard(&mut self);
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Open connections.
    pub total: u32,
    /// Open connections not currently borrowed.
    pub idle: usize,
    /// Callers suspended in `acquire`.
    pub waiting: usize,
}

/// Bounded set of relational-store connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Borrows a connection, suspending while the pool is saturated.
    async fn acquire(&self) -> OrderlyResult<Box<dyn Connection>>;

    /// Current occupancy.
    fn stats(&self) -> PoolStats;
}

/// Guard owning a borrowed connection.
pub struct PooledConnection {
    inner: Option<Box<dyn Connection>>,
    discard_on_drop: bool,
}

impl PooledConnection {
    /// Takes ownership of a freshly acquired connection.
    #[must_use]
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            inner: Some(conn),
            discard_on_drop: false,
        }
    }

    /// Runs a statement on the held connection.
    pub async fn query(&mut self, statement: &str, params: &[Value]) -> OrderlyResult<RowSet> {
        self.conn()?.query(statement, params).await
    }

    /// Applies a statement timeout to the held connection.
    pub async fn set_statement_timeout(&mut self, timeout: Duration) -> OrderlyResult<()> {
        self.conn()?.set_statement_timeout(timeout).await
    }

    /// Releases the connection now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// While set, dropping the guard discards the connection.
    pub fn discard_on_drop(&mut self, discard: bool) {
        self.discard_on_drop = discard;
    }

    fn conn(&mut self) -> OrderlyResult<&mut Box<dyn Connection>> {
        self.inner
            .as_mut()
            .ok_or_else(|| OrderlyError::Pool("connection already released".to_string()))
    }

    fn release_inner(&mut self) {
        if let Some(mut conn) = self.inner.take() {
            if self.discard_on_drop {
                conn.discard();
            } else {
                conn.release();
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("held", &self.inner.is_some())
            .field("discard_on_drop", &self.discard_on_drop)
            .finish()
    }
}
