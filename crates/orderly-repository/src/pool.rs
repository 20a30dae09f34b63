//! PostgreSQL connection pool over SQLx.

use crate::connection::{Connection, ConnectionPool, PoolStats};
use crate::row::{Row, RowSet};
use async_trait::async_trait;
use futures::TryStreamExt;
use orderly_config::DatabaseConfig;
use orderly_core::{OrderlyError, OrderlyResult};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Either, Postgres, Row as _, TypeInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQLx-backed [`ConnectionPool`].
pub struct PgConnectionPool {
    pool: PgPool,
    waiting: AtomicUsize,
    log_queries: bool,
}

impl PgConnectionPool {
    /// Connects a new pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> OrderlyResult<Self> {
        info!("Connecting to PostgreSQL database...");

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                OrderlyError::database(format!("Failed to connect: {}", e))
            })?;

        info!(max_connections = config.max_connections, "PostgreSQL connection pool established");
        Ok(Self::with_pool(pool, config.log_queries))
    }

    /// Wraps an existing SQLx pool.
    #[must_use]
    pub fn with_pool(pool: PgPool, log_queries: bool) -> Self {
        Self {
            pool,
            waiting: AtomicUsize::new(0),
            log_queries,
        }
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the pool, waiting for borrowed connections to come back.
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    async fn acquire(&self) -> OrderlyResult<Box<dyn Connection>> {
        let conn = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            self.pool.acquire().await?
        };
        Ok(Box::new(PgConnection {
            conn: Some(conn),
            log_queries: self.log_queries,
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.pool.size(),
            idle: self.pool.num_idle(),
            waiting: self.waiting.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PgConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnectionPool")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .field("waiting", &self.waiting.load(Ordering::Relaxed))
            .finish()
    }
}

/// Creates a shared connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> OrderlyResult<Arc<PgConnectionPool>> {
    let pool = PgConnectionPool::connect(config).await?;
    Ok(Arc::new(pool))
}

/// Counts a caller as waiting until dropped, including when the acquire
/// future is cancelled.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A connection checked out of a [`PgConnectionPool`].
struct PgConnection {
    conn: Option<PoolConnection<Postgres>>,
    log_queries: bool,
}

impl PgConnection {
    fn live(&mut self) -> OrderlyResult<&mut PoolConnection<Postgres>> {
        self.conn
            .as_mut()
            .ok_or_else(|| OrderlyError::Pool("connection already released".to_string()))
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&mut self, statement: &str, params: &[Value]) -> OrderlyResult<RowSet> {
        if self.log_queries {
            debug!(statement, params = params.len(), "Executing statement");
        }

        let conn = self.live()?;
        let query = params
            .iter()
            .fold(sqlx::query(statement), |query, param| bind_json(query, param));

        let mut rows = Vec::new();
        let mut rows_affected = 0;

        // `fetch_many` is the only call that yields both rows and the
        // affected-row count of a single statement.
        #[allow(deprecated)]
        let mut stream = query.fetch_many(&mut **conn);
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(decode_row(&row)?),
            }
        }

        Ok(RowSet { rows, rows_affected })
    }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> OrderlyResult<()> {
        // SET does not take bind parameters; the value is an integer we format.
        let statement = format!("SET statement_timeout = {}", timeout.as_millis());
        let conn = self.live()?;
        sqlx::query(&statement).execute(&mut **conn).await?;
        Ok(())
    }

    fn release(&mut self) {
        // Dropping a PoolConnection returns it to the pool.
        self.conn.take();
    }

    fn discard(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            // The server aborts any open transaction when the session ends.
            conn.close_on_drop();
            warn!("Discarding connection with unfinished session state");
        }
    }
}

/// Binds one JSON parameter with the closest PostgreSQL type.
///
/// `null` is sent as a typed text NULL; cast the placeholder (`$1::int8`)
/// where the column type differs.
fn bind_json<'q>(query: Query<'q, Postgres, PgArguments>, value: &'q Value) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
    }
}

fn decode_row(row: &PgRow) -> OrderlyResult<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_column(row, column.ordinal(), column.type_info().name())?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

/// Converts one column to JSON by its PostgreSQL type name.
///
/// Timestamps become RFC 3339 strings. NUMERIC and other types without a
/// mapping must be cast in the select list.
fn decode_column(row: &PgRow, index: usize, type_name: &str) -> OrderlyResult<Value> {
    let value = match type_name {
        "BOOL" => opt(row.try_get::<Option<bool>, _>(index)?),
        "INT2" => opt(row.try_get::<Option<i16>, _>(index)?),
        "INT4" => opt(row.try_get::<Option<i32>, _>(index)?),
        "INT8" => opt(row.try_get::<Option<i64>, _>(index)?),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(index)?),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => opt(row.try_get::<Option<String>, _>(index)?),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?.unwrap_or(Value::Null),
        "UUID" => opt(row.try_get::<Option<uuid::Uuid>, _>(index)?.map(|u| u.to_string())),
        "TIMESTAMPTZ" => opt(row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|t| t.to_rfc3339())),
        "TIMESTAMP" => opt(row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => opt(row.try_get::<Option<chrono::NaiveDate>, _>(index)?.map(|d| d.to_string())),
        "TEXT[]" | "VARCHAR[]" => opt(row.try_get::<Option<Vec<String>>, _>(index)?),
        "INT4[]" => opt(row.try_get::<Option<Vec<i32>>, _>(index)?),
        "INT8[]" => opt(row.try_get::<Option<Vec<i64>>, _>(index)?),
        other => {
            return Err(OrderlyError::Serialization(format!(
                "Unsupported column type {} at index {}",
                other, index
            )))
        }
    };
    Ok(value)
}
