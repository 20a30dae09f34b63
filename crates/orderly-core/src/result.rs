//! Result type aliases for Orderly.

use crate::OrderlyError;

/// A specialized `Result` type for Orderly operations.
pub type OrderlyResult<T> = Result<T, OrderlyError>;

/// A boxed future returning an `OrderlyResult`.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = OrderlyResult<T>> + Send + 'a>>;
