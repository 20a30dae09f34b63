//! Cache metrics.

use metrics::{counter, describe_counter};

/// Metric names emitted by the two-tier cache.
pub mod names {
    /// Lookups answered by a tier (labelled `tier=local|remote`).
    pub const CACHE_HITS_TOTAL: &str = "orderly_cache_hits_total";
    /// Lookups answered by neither tier.
    pub const CACHE_MISSES_TOTAL: &str = "orderly_cache_misses_total";
    /// Remote operations that failed and were swallowed (labelled `op`).
    pub const CACHE_REMOTE_ERRORS_TOTAL: &str = "orderly_cache_remote_errors_total";
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Cache lookups answered, by tier");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Cache lookups answered by neither tier");
    describe_counter!(
        names::CACHE_REMOTE_ERRORS_TOTAL,
        "Remote cache operations that failed and were treated as a miss or no-op"
    );
}

/// Record a hit on `tier`.
pub fn record_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a miss on both tiers.
pub fn record_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a swallowed remote failure.
pub fn record_remote_error(op: &'static str) {
    counter!(names::CACHE_REMOTE_ERRORS_TOTAL, "op" => op).increment(1);
}
