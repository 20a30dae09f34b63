//! # Orderly Repository
//!
//! Data access for Orderly:
//!
//! ```text
//! ShopQueries                 (shop, settings, orders, alerts, counts)
//!   ↓  Arc<QueryExecutor>     (timeouts, retry, result cache, transactions)
//! QueryExecutor
//!   ↓  Arc<dyn ConnectionPool>
//! PgConnectionPool            (SQLx / PostgreSQL)
//!   ↓
//! PostgreSQL
//! ```

pub mod connection;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod queries;
pub mod row;

#[cfg(test)]
mod testing;

pub use connection::{Connection, ConnectionPool, PoolStats, PooledConnection};
pub use executor::{QueryExecutor, QueryOptions, Transaction};
pub use pool::{create_pool, PgConnectionPool};
pub use queries::{DelayAlert, Order, OrderCounts, Shop, ShopQueries, ShopSettings};
pub use row::{row, Row, RowSet};
