//! Redis-backed remote cache.

use crate::remote::{RemoteCache, RemoteOp};
use async_trait::async_trait;
use deadpool_redis::{
    redis::{self, AsyncCommands, RedisResult},
    Pool, PoolConfig, Runtime,
};
use orderly_config::RedisConfig;
use orderly_core::{OrderlyError, OrderlyResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keys requested per `SCAN` step.
const SCAN_BATCH: usize = 200;

/// Remote cache over a pooled Redis connection.
pub struct RedisRemoteCache {
    pool: Pool,
    connected: AtomicBool,
}

impl RedisRemoteCache {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            connected: AtomicBool::new(false),
        }
    }

    /// Builds a pool from configuration and probes it once.
    ///
    /// Returns `Ok(None)` when Redis is disabled. An unreachable server is not
    /// an error: the cache starts disconnected and keeps trying per call.
    pub async fn connect(config: &RedisConfig) -> OrderlyResult<Option<Arc<Self>>> {
        if !config.enabled {
            info!("Redis disabled; two-tier cache will run local-only");
            return Ok(None);
        }

        let mut redis_cfg = deadpool_redis::Config::from_url(&config.url);
        redis_cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = redis_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| OrderlyError::Configuration(format!("Failed to create Redis pool: {}", e)))?;

        let cache = Self::new(pool);
        match cache.ping().await {
            Ok(()) => info!(url = %config.url, "Redis connection pool established"),
            Err(e) => warn!(url = %config.url, error = %e, "Redis unreachable at startup"),
        }
        Ok(Some(Arc::new(cache)))
    }

    async fn conn(&self) -> OrderlyResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| {
            self.connected.store(false, Ordering::Relaxed);
            OrderlyError::Cache(format!("Failed to get Redis connection: {}", e))
        })
    }

    /// Records the outcome of a command and maps its error.
    fn track<T>(&self, op: &str, result: RedisResult<T>) -> OrderlyResult<T> {
        match result {
            Ok(value) => {
                self.connected.store(true, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    self.connected.store(false, Ordering::Relaxed);
                }
                Err(OrderlyError::Cache(format!("Redis {} failed: {}", op, e)))
            }
        }
    }
}

#[async_trait]
impl RemoteCache for RedisRemoteCache {
    async fn get(&self, key: &str) -> OrderlyResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: RedisResult<Option<String>> = conn.get(key).await;
        self.track("GET", value)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> OrderlyResult<()> {
        let mut conn = self.conn().await?;
        let ttl_ms = ttl_millis(ttl);
        let result: RedisResult<()> = conn.pset_ex(key, value, ttl_ms).await;
        self.track("PSETEX", result)?;
        debug!(key = %key, ttl_ms, "Stored remote cache entry");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> OrderlyResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let deleted: RedisResult<u64> = conn.del(keys).await;
        self.track("DEL", deleted)
    }

    async fn multi_get(&self, keys: &[String]) -> OrderlyResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // Explicit MGET: a single key must still come back as an array.
        let values: RedisResult<Vec<Option<String>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await;
        self.track("MGET", values)
    }

    async fn keys_matching(&self, pattern: &str) -> OrderlyResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut keys = HashSet::new();

        loop {
            let step: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next, batch) = self.track("SCAN", step)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }

    async fn pipeline(&self, ops: Vec<RemoteOp>) -> OrderlyResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        let mut queued = 0;
        for op in &ops {
            match op {
                RemoteOp::SetWithExpiry { key, value, ttl } => {
                    pipe.pset_ex(key, value, ttl_millis(*ttl)).ignore();
                    queued += 1;
                }
                RemoteOp::Delete { keys } if !keys.is_empty() => {
                    pipe.del(keys).ignore();
                    queued += 1;
                }
                RemoteOp::Delete { .. } => {}
            }
        }
        if queued == 0 {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let result: RedisResult<()> = pipe.query_async(&mut conn).await;
        self.track("pipeline", result)?;
        debug!(ops = queued, "Executed remote cache pipeline");
        Ok(())
    }

    async fn ping(&self) -> OrderlyResult<()> {
        let mut conn = self.conn().await?;
        let pong: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.track("PING", pong).map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RedisRemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisRemoteCache")
            .field("size", &status.size)
            .field("available", &status.available)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Expiry in milliseconds for `PSETEX`, which rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
