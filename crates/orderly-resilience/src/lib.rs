//! # Orderly Resilience
//!
//! Resilience patterns for the Orderly data-access layer:
//! failure classification, retry with bounded exponential backoff, and
//! timeouts.

pub mod classify;
pub mod metrics;
pub mod retry;
pub mod timeout;

pub use classify::*;
pub use retry::*;
pub use timeout::*;
