//! Timeout wrapper for async operations.

use orderly_core::OrderlyError;
use std::future::Future;
use std::time::Duration;

/// Wraps an async operation with a timeout.
///
/// On expiry the inner future is dropped and `OrderlyError::Timeout` is
/// returned, naming `what` timed out.
pub async fn with_timeout<Fut, T>(duration: Duration, what: &str, fut: Fut) -> Result<T, OrderlyError>
where
    Fut: Future<Output = Result<T, OrderlyError>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| OrderlyError::Timeout(format!("{} timed out after {:?}", what, duration)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), "query", async { Ok::<_, OrderlyError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exceeded() {
        let result = with_timeout(Duration::from_millis(10), "query", async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, OrderlyError>(42)
        })
        .await;

        match result {
            Err(OrderlyError::Timeout(message)) => assert!(message.starts_with("query timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<(), _> =
            with_timeout(Duration::from_secs(1), "query", async { Err(OrderlyError::database("boom")) }).await;
        assert_eq!(result.unwrap_err().raw_message(), "boom");
    }
}
