//! Query executor: pooled execution with timeouts, retry, result caching
//! and transactions.
//!
//! Every connection is held by a [`PooledConnection`] guard, so each attempt
//! releases exactly once whether it succeeds, fails, or times out.

use crate::connection::{ConnectionPool, PoolStats, PooledConnection};
use crate::metrics;
use crate::row::RowSet;
use orderly_cache::TtlCache;
use orderly_config::QueryConfig;
use orderly_core::{BoxFuture, OrderlyError, OrderlyResult};
use orderly_resilience::{classify_error, with_timeout, RetryPolicy};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const SLOW_QUERY_LOG_CHARS: usize = 200;

/// Per-request execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Bound on each attempt, applied both server-side and client-side.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Serve and store results in the executor's result cache.
    pub cache: bool,
    /// Result cache lifetime.
    pub cache_ttl: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 3,
            cache: false,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl From<&QueryConfig> for QueryOptions {
    fn from(config: &QueryConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            cache: false,
            cache_ttl: config.cache_ttl(),
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Enables the result cache with the given lifetime.
    #[must_use]
    pub fn cached(mut self, ttl: Duration) -> Self {
        self.cache = true;
        self.cache_ttl = ttl;
        self
    }
}

/// Executes statements against a [`ConnectionPool`].
pub struct QueryExecutor {
    pool: Arc<dyn ConnectionPool>,
    results: TtlCache<RowSet>,
    defaults: QueryOptions,
    backoff_base: Duration,
    backoff_max: Duration,
    slow_query_threshold: Duration,
}

impl QueryExecutor {
    /// Creates an executor with default settings.
    #[must_use]
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self::from_config(pool, &QueryConfig::default())
    }

    /// Creates an executor from the `[query]` configuration section.
    #[must_use]
    pub fn from_config(pool: Arc<dyn ConnectionPool>, config: &QueryConfig) -> Self {
        Self {
            pool,
            results: TtlCache::new(config.result_cache_capacity),
            defaults: QueryOptions::from(config),
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            slow_query_threshold: config.slow_query_threshold(),
        }
    }

    /// Options used when a caller has no overrides.
    #[must_use]
    pub fn default_options(&self) -> QueryOptions {
        self.defaults.clone()
    }

    /// Executes one statement.
    ///
    /// Retryable failures are retried with exponential backoff up to
    /// `options.retries` times; the last error is returned on exhaustion.
    /// Permanent failures (syntax, permissions, missing relations, unique
    /// violations) return after one attempt.
    pub async fn execute(&self, statement: &str, params: &[Value], options: &QueryOptions) -> OrderlyResult<RowSet> {
        ensure_statement(statement)?;

        let cache_key = if options.cache {
            Some(result_cache_key(statement, params)?)
        } else {
            None
        };

        if let Some(key) = &cache_key {
            if let Some(rows) = self.results.get(key) {
                debug!(statement, "Result cache hit");
                metrics::record_result_cache_hit();
                return Ok(rows);
            }
        }

        let policy = RetryPolicy::with_max_retries(options.retries).with_backoff(self.backoff_base, self.backoff_max);
        let timeout = options.timeout;

        let rows = policy
            .execute(classify_error, move |attempt| self.attempt(statement, params, timeout, attempt))
            .await
            .map_err(|e| {
                warn!(statement, error = %e, "Query failed");
                e
            })?;

        if let Some(key) = cache_key {
            self.results.insert(key, rows.clone(), options.cache_ttl);
        }
        Ok(rows)
    }

    async fn attempt(
        &self,
        statement: &str,
        params: &[Value],
        timeout: Duration,
        attempt: u32,
    ) -> OrderlyResult<RowSet> {
        let mut conn = self.acquire().await?;
        conn.set_statement_timeout(timeout).await?;

        let started = Instant::now();
        let result = with_timeout(timeout, "query", conn.query(statement, params)).await;
        let elapsed = started.elapsed();
        conn.release();

        metrics::record_query(elapsed, result.is_ok());
        if elapsed > self.slow_query_threshold {
            metrics::record_slow_query();
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                attempt,
                statement = %truncate(statement, SLOW_QUERY_LOG_CHARS),
                "Slow query"
            );
        }
        result
    }

    /// Runs `body` inside `BEGIN`/`COMMIT` on a single connection.
    ///
    /// Any body error, or a failing `COMMIT`, issues `ROLLBACK` and returns
    /// the original error. If the rollback fails too, both are returned as
    /// [`OrderlyError::Rollback`]. A connection whose transaction did not end
    /// cleanly, including when this future is dropped mid-body, is closed
    /// rather than returned to the pool.
    ///
    /// ```ignore
    /// let id = executor
    ///     .run_transaction(|tx| Box::pin(async move {
    ///         tx.query("UPDATE orders SET status = $1 WHERE id = $2", &[json!("shipped"), json!(7)]).await?;
    ///         Ok(7)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run_transaction<T, F>(&self, body: F) -> OrderlyResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, T>,
    {
        let mut tx = Transaction {
            conn: self.acquire().await?,
        };
        tx.conn.set_statement_timeout(self.defaults.timeout).await?;
        // Until COMMIT or ROLLBACK lands, dropping this future must not hand
        // the open transaction back to the pool.
        tx.conn.discard_on_drop(true);
        tx.conn.query("BEGIN", &[]).await?;

        let outcome = match body(&mut tx).await {
            Ok(value) => tx.conn.query("COMMIT", &[]).await.map(|_| value),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => {
                tx.conn.discard_on_drop(false);
                metrics::record_transaction("committed");
                Ok(value)
            }
            Err(cause) => match tx.conn.query("ROLLBACK", &[]).await {
                Ok(_) => {
                    tx.conn.discard_on_drop(false);
                    debug!(error = %cause, "Transaction rolled back");
                    metrics::record_transaction("rolled_back");
                    Err(cause)
                }
                Err(rollback) => {
                    warn!(error = %cause, rollback_error = %rollback, "Transaction rollback failed");
                    metrics::record_transaction("rollback_failed");
                    Err(OrderlyError::Rollback {
                        source: Box::new(cause),
                        rollback: Box::new(rollback),
                    })
                }
            },
        }
    }

    /// Runs statements in order on one connection, without a transaction.
    ///
    /// The first failure aborts the batch; earlier statements stay applied.
    pub async fn execute_batch<S: AsRef<str>>(&self, batch: &[(S, Vec<Value>)]) -> OrderlyResult<Vec<RowSet>> {
        for (statement, _) in batch {
            ensure_statement(statement.as_ref())?;
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = self.defaults.timeout;
        let mut conn = self.acquire().await?;
        conn.set_statement_timeout(timeout).await?;

        let mut results = Vec::with_capacity(batch.len());
        for (index, (statement, params)) in batch.iter().enumerate() {
            let rows = with_timeout(timeout, "batch statement", conn.query(statement.as_ref(), params))
                .await
                .map_err(|e| {
                    warn!(index, error = %e, "Batch aborted");
                    e
                })?;
            results.push(rows);
        }
        Ok(results)
    }

    /// Executes and decodes every row into `T`.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        statement: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> OrderlyResult<Vec<T>> {
        self.execute(statement, params, options).await?.decode()
    }

    /// Executes and decodes the first row, if any.
    pub async fn fetch_optional<T: DeserializeOwned>(
        &self,
        statement: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> OrderlyResult<Option<T>> {
        self.execute(statement, params, options).await?.decode_first()
    }

    /// Executes and decodes the first column of the first row.
    ///
    /// An empty result is a `NotFound` error.
    pub async fn fetch_scalar<T: DeserializeOwned>(
        &self,
        statement: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> OrderlyResult<T> {
        self.execute(statement, params, options)
            .await?
            .scalar()?
            .ok_or_else(|| OrderlyError::not_found("row", truncate(statement, SLOW_QUERY_LOG_CHARS)))
    }

    /// Drops every cached result.
    pub fn clear_cache(&self) {
        self.results.clear();
    }

    /// Number of cached results, including expired ones not yet swept.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Round trip to the store with no retries.
    pub async fn health_check(&self) -> OrderlyResult<()> {
        let options = self.default_options().with_retries(0);
        self.execute("SELECT 1", &[], &options).await.map(|_| ())
    }

    async fn acquire(&self) -> OrderlyResult<PooledConnection> {
        self.pool.acquire().await.map(PooledConnection::new)
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("defaults", &self.defaults)
            .field("cached_results", &self.results.len())
            .field("pool", &self.pool.stats())
            .finish()
    }
}

/// Connection handed to a [`QueryExecutor::run_transaction`] body.
#[derive(Debug)]
pub struct Transaction {
    conn: PooledConnection,
}

impl Transaction {
    /// Runs a statement inside the transaction.
    pub async fn query(&mut self, statement: &str, params: &[Value]) -> OrderlyResult<RowSet> {
        ensure_statement(statement)?;
        self.conn.query(statement, params).await
    }

    /// Runs a statement and decodes every row into `T`.
    pub async fn fetch_all<T: DeserializeOwned>(&mut self, statement: &str, params: &[Value]) -> OrderlyResult<Vec<T>> {
        self.query(statement, params).await?.decode()
    }
}

fn ensure_statement(statement: &str) -> OrderlyResult<()> {
    if statement.trim().is_empty() {
        return Err(OrderlyError::validation("statement must not be empty"));
    }
    Ok(())
}

fn result_cache_key(statement: &str, params: &[Value]) -> OrderlyResult<String> {
    Ok(format!("{}:{}", statement, serde_json::to_string(params)?))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
