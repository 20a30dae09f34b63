//! Retry metrics.

use metrics::{counter, describe_counter};

/// Metric names emitted by this crate.
pub mod names {
    /// Total retry attempts scheduled after transient failures.
    pub const RETRIES_TOTAL: &str = "orderly_retries_total";
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::RETRIES_TOTAL,
        "Total number of retries scheduled after transient failures"
    );
}

/// Record a scheduled retry.
pub fn record_retry() {
    counter!(names::RETRIES_TOTAL).increment(1);
}
