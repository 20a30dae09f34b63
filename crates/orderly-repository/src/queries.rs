//! Pre-built shop, settings, order and alert queries.
//!
//! Results are memoised either in the executor's result cache or, when a
//! shared [`TwoTierCache`] is attached, in that cache under the keys from
//! [`orderly_cache::cache_keys`] so other processes see them and
//! [`ShopQueries::invalidate_orders`] can drop them.

use crate::executor::{QueryExecutor, QueryOptions};
use chrono::{DateTime, Utc};
use orderly_cache::{cache_keys, CacheSettings, TwoTierCache};
use orderly_core::{OrderlyResult, Page, PageRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const SHOP_TTL: Duration = Duration::from_secs(300);
const LISTING_TTL: Duration = Duration::from_secs(60);

const SHOP_COLUMNS: &str = "id, shop_domain, plan_name, is_active, installed_at";
const SETTINGS_COLUMNS: &str =
    "shop_id, delay_threshold_days, email_notifications, sms_notifications, notification_email, updated_at";
const ORDER_COLUMNS: &str = "id, shop_id, order_number, fulfillment_status, customer_email, \
     tracking_number, carrier, is_delayed, delay_days, created_at, updated_at";
const ALERT_COLUMNS: &str = "id, shop_id, order_id, delay_days, status, created_at, resolved_at";

/// An installed shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: i64,
    pub shop_domain: String,
    pub plan_name: Option<String>,
    pub is_active: bool,
    pub installed_at: DateTime<Utc>,
}

/// Per-shop delay and notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopSettings {
    pub shop_id: i64,
    pub delay_threshold_days: i32,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    pub notification_email: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A tracked order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub shop_id: i64,
    pub order_number: String,
    pub fulfillment_status: String,
    pub customer_email: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub is_delayed: bool,
    pub delay_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A delay alert raised for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayAlert {
    pub id: i64,
    pub shop_id: i64,
    pub order_id: i64,
    pub delay_days: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Order totals for a shop's dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCounts {
    pub total: i64,
    pub delayed: i64,
    pub open_alerts: i64,
}

/// Read-side queries for one database.
pub struct ShopQueries {
    executor: Arc<QueryExecutor>,
    shared: Option<(Arc<TwoTierCache>, CacheSettings)>,
}

impl ShopQueries {
    /// Queries cached in the executor's result cache.
    #[must_use]
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor, shared: None }
    }

    /// Queries cached in a shared two-tier cache instead.
    #[must_use]
    pub fn with_shared_cache(executor: Arc<QueryExecutor>, cache: Arc<TwoTierCache>, settings: CacheSettings) -> Self {
        Self {
            executor,
            shared: Some((cache, settings)),
        }
    }

    /// Looks up a shop by its domain, case-insensitively.
    pub async fn find_shop(&self, shop_domain: &str) -> OrderlyResult<Option<Shop>> {
        let statement = format!("SELECT {} FROM shops WHERE lower(shop_domain) = lower($1)", SHOP_COLUMNS);
        let params = [json!(shop_domain)];
        self.cached(cache_keys::shop_by_domain(shop_domain), SHOP_TTL, |options| async move {
            self.executor.fetch_optional(&statement, &params, &options).await
        })
        .await
    }

    /// Settings of a shop, if configured.
    pub async fn find_settings(&self, shop_id: i64) -> OrderlyResult<Option<ShopSettings>> {
        let statement = format!("SELECT {} FROM shop_settings WHERE shop_id = $1", SETTINGS_COLUMNS);
        let params = [json!(shop_id)];
        self.cached(cache_keys::shop_settings(shop_id), SHOP_TTL, |options| async move {
            self.executor.fetch_optional(&statement, &params, &options).await
        })
        .await
    }

    /// One page of a shop's orders, newest first.
    pub async fn orders_page(
        &self,
        shop_id: i64,
        status: Option<&str>,
        request: PageRequest,
    ) -> OrderlyResult<Page<Order>> {
        let key = cache_keys::orders_page(shop_id, status, request.page, request.limit);
        self.cached(key, LISTING_TTL, |options| {
            self.page(
                "orders",
                ORDER_COLUMNS,
                "fulfillment_status",
                shop_id,
                status,
                request,
                options,
            )
        })
        .await
    }

    /// One page of a shop's delay alerts, newest first.
    pub async fn alerts_page(
        &self,
        shop_id: i64,
        status: Option<&str>,
        request: PageRequest,
    ) -> OrderlyResult<Page<DelayAlert>> {
        let key = cache_keys::alerts_page(shop_id, status, request.page, request.limit);
        self.cached(key, LISTING_TTL, |options| {
            self.page("delay_alerts", ALERT_COLUMNS, "status", shop_id, status, request, options)
        })
        .await
    }

    /// Order, delayed-order and open-alert totals.
    pub async fn order_counts(&self, shop_id: i64) -> OrderlyResult<OrderCounts> {
        let statement = "SELECT \
                (SELECT COUNT(*) FROM orders WHERE shop_id = $1) AS total, \
                (SELECT COUNT(*) FROM orders WHERE shop_id = $1 AND is_delayed) AS delayed, \
                (SELECT COUNT(*) FROM delay_alerts WHERE shop_id = $1 AND status = 'open') AS open_alerts";
        let params = [json!(shop_id)];
        self.cached(cache_keys::order_counts(shop_id), LISTING_TTL, |options| async move {
            let counts = self.executor.fetch_optional(statement, &params, &options).await?;
            Ok(counts.unwrap_or_default())
        })
        .await
    }

    /// Number of orders of a shop, optionally restricted to one status.
    pub async fn count_orders(&self, shop_id: i64, status: Option<&str>) -> OrderlyResult<i64> {
        self.cached(cache_keys::orders_count(shop_id, status), LISTING_TTL, |options| async move {
            self.count("orders", "fulfillment_status", shop_id, status, &options).await
        })
        .await
    }

    /// Number of delay alerts of a shop, optionally restricted to one status.
    pub async fn count_alerts(&self, shop_id: i64, status: Option<&str>) -> OrderlyResult<i64> {
        self.cached(cache_keys::alerts_count(shop_id, status), LISTING_TTL, |options| async move {
            self.count("delay_alerts", "status", shop_id, status, &options).await
        })
        .await
    }

    /// Drops cached order and alert listings of a shop from the shared cache.
    ///
    /// Without a shared cache, the executor's result cache is cleared.
    pub async fn invalidate_orders(&self, shop_id: i64) {
        match &self.shared {
            Some((cache, settings)) => {
                cache.invalidate_pattern(&cache_keys::orders_pattern(shop_id), settings).await;
                cache.invalidate_pattern(&cache_keys::alerts_pattern(shop_id), settings).await;
            }
            None => self.executor.clear_cache(),
        }
    }

    async fn cached<T, F, Fut>(&self, key: String, ttl: Duration, load: F) -> OrderlyResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(QueryOptions) -> Fut,
        Fut: Future<Output = OrderlyResult<T>>,
    {
        match &self.shared {
            Some((cache, settings)) => {
                let settings = settings.with_ttl(ttl);
                cache
                    .get_or_set(&key, &settings, || load(self.executor.default_options()))
                    .await
            }
            None => load(self.executor.default_options().cached(ttl)).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn page<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        status_column: &str,
        shop_id: i64,
        status: Option<&str>,
        request: PageRequest,
        options: QueryOptions,
    ) -> OrderlyResult<Page<T>> {
        let total = self.count(table, status_column, shop_id, status, &options).await?;
        let statement = format!(
            "SELECT {columns} FROM {table} \
             WHERE shop_id = $1 AND ($2::text IS NULL OR {status_column} = $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
        );
        let params = [
            json!(shop_id),
            status_param(status),
            json!(request.limit),
            json!(request.offset()),
        ];
        let data = self.executor.fetch_all(&statement, &params, &options).await?;
        Ok(Page::new(data, request, u64::try_from(total).unwrap_or(0)))
    }

    async fn count(
        &self,
        table: &str,
        status_column: &str,
        shop_id: i64,
        status: Option<&str>,
        options: &QueryOptions,
    ) -> OrderlyResult<i64> {
        let statement = format!(
            "SELECT COUNT(*) AS count FROM {table} \
             WHERE shop_id = $1 AND ($2::text IS NULL OR {status_column} = $2)"
        );
        let params = [json!(shop_id), status_param(status)];
        self.executor.fetch_scalar(&statement, &params, options).await
    }
}

fn status_param(status: Option<&str>) -> Value {
    status.map_or(Value::Null, |s| json!(s))
}
