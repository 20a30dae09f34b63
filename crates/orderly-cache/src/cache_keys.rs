//! Logical cache key generators.
//!
//! Keys are namespace-free; [`CacheSettings::key`](crate::CacheSettings::key)
//! adds the namespace. Every per-shop listing and count key starts with the
//! `{kind}:{shop_id}:` fragment so one pattern drops all of them.

/// Key for a shop looked up by its domain.
#[must_use]
pub fn shop_by_domain(domain: &str) -> String {
    format!("shop:{}", domain.to_lowercase())
}

/// Key for a shop's settings row.
#[must_use]
pub fn shop_settings(shop_id: i64) -> String {
    format!("settings:{}", shop_id)
}

/// Key for one page of a shop's orders, optionally filtered by status.
#[must_use]
pub fn orders_page(shop_id: i64, status: Option<&str>, page: u32, limit: u32) -> String {
    format!("orders:{}:{}:{}:{}", shop_id, status.unwrap_or("all"), page, limit)
}

/// Key for one page of a shop's delay alerts.
#[must_use]
pub fn alerts_page(shop_id: i64, status: Option<&str>, page: u32, limit: u32) -> String {
    format!("alerts:{}:{}:{}:{}", shop_id, status.unwrap_or("all"), page, limit)
}

/// Key for the number of a shop's orders, optionally filtered by status.
#[must_use]
pub fn orders_count(shop_id: i64, status: Option<&str>) -> String {
    format!("orders:{}:count:{}", shop_id, status.unwrap_or("all"))
}

/// Key for the number of a shop's delay alerts.
#[must_use]
pub fn alerts_count(shop_id: i64, status: Option<&str>) -> String {
    format!("alerts:{}:count:{}", shop_id, status.unwrap_or("all"))
}

/// Key for a shop's dashboard totals.
///
/// Lives under the orders prefix, so order invalidation drops it too.
#[must_use]
pub fn order_counts(shop_id: i64) -> String {
    format!("orders:{}:counts", shop_id)
}

/// Pattern covering every cached orders page of a shop.
#[must_use]
pub fn orders_pattern(shop_id: i64) -> String {
    format!("orders:{}:*", shop_id)
}

/// Pattern covering every cached alerts page of a shop.
#[must_use]
pub fn alerts_pattern(shop_id: i64) -> String {
    format!("alerts:{}:*", shop_id)
}
