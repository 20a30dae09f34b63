//! Query executor metrics.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names emitted by the query executor.
pub mod names {
    pub const QUERIES_TOTAL: &str = "orderly_queries_total";
    pub const QUERY_DURATION_SECONDS: &str = "orderly_query_duration_seconds";
    pub const SLOW_QUERIES_TOTAL: &str = "orderly_slow_queries_total";
    pub const RESULT_CACHE_HITS_TOTAL: &str = "orderly_result_cache_hits_total";
    pub const TRANSACTIONS_TOTAL: &str = "orderly_transactions_total";
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::QUERIES_TOTAL, "Statement executions by outcome");
    describe_histogram!(names::QUERY_DURATION_SECONDS, "Statement execution time in seconds");
    describe_counter!(names::SLOW_QUERIES_TOTAL, "Statements slower than the slow-query threshold");
    describe_counter!(names::RESULT_CACHE_HITS_TOTAL, "Executions answered by the result cache");
    describe_counter!(names::TRANSACTIONS_TOTAL, "Transactions by outcome");
}

pub(crate) fn record_query(elapsed: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(names::QUERIES_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::QUERY_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub(crate) fn record_slow_query() {
    counter!(names::SLOW_QUERIES_TOTAL).increment(1);
}

pub(crate) fn record_result_cache_hit() {
    counter!(names::RESULT_CACHE_HITS_TOTAL).increment(1);
}

pub(crate) fn record_transaction(outcome: &'static str) {
    counter!(names::TRANSACTIONS_TOTAL, "outcome" => outcome).increment(1);
}
