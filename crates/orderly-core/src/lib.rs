//! # Orderly Core
//!
//! Core types and error definitions shared by every Orderly crate:
//! the unified error enum, result aliases, pagination primitives and
//! tracing initialisation.

pub mod error;
pub mod pagination;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use pagination::*;
pub use result::*;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
