//! Retry policy and the bounded retry state machine.
//!
//! A request moves through
//! `Attempting -> (Succeeded | RetryWait -> Attempting | Failed)`.
//! The machine owns the attempt counter; the driver in
//! [`RetryPolicy::execute`] only sleeps and re-invokes the operation.

use crate::classify::FailureClass;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with the default backoff and the given retry budget.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Overrides the backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after attempt number `attempt` (0-based) failed.
    ///
    /// `min(base * multiplier^attempt, max)`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. The last error is returned on exhaustion.
    ///
    /// `operation` receives the 0-based attempt number.
    pub async fn execute<F, Fut, T, E, C>(&self, classify: C, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureClass,
        E: std::fmt::Display,
    {
        let mut machine = RetryMachine::new(self.clone());

        loop {
            let RetryState::Attempting { attempt } = machine.state() else {
                unreachable!("driver only runs attempts from the Attempting state");
            };

            match operation(attempt).await {
                Ok(value) => {
                    machine.succeed();
                    return Ok(value);
                }
                Err(err) => match machine.fail(classify(&err)) {
                    RetryState::RetryWait { attempt, delay } => {
                        debug!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying after transient failure"
                        );
                        crate::metrics::record_retry();
                        tokio::time::sleep(delay).await;
                        machine.resume();
                    }
                    _ => return Err(err),
                },
            }
        }
    }
}

/// States of a single request's retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt number `attempt` (0-based) is running.
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed transiently; wait `delay` before the next.
    RetryWait { attempt: u32, delay: Duration },
    /// The operation succeeded.
    Succeeded,
    /// The operation failed permanently or the budget is spent.
    Failed { attempts: u32 },
}

/// Per-request retry state machine.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    /// Starts a machine at the first attempt.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting { attempt: 0 },
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RetryState {
        self.state
    }

    /// Records success of the running attempt.
    pub fn succeed(&mut self) -> RetryState {
        if let RetryState::Attempting { .. } = self.state {
            self.state = RetryState::Succeeded;
        }
        self.state
    }

    /// Records failure of the running attempt and decides what happens next.
    pub fn fail(&mut self, class: FailureClass) -> RetryState {
        let RetryState::Attempting { attempt } = self.state else {
            return self.state;
        };

        self.state = match class {
            FailureClass::Retryable if attempt < self.policy.max_retries => RetryState::RetryWait {
                attempt,
                delay: self.policy.delay_after(attempt),
            },
            _ => RetryState::Failed { attempts: attempt + 1 },
        };
        self.state
    }

    /// Leaves `RetryWait` and starts the next attempt.
    pub fn resume(&mut self) -> RetryState {
        if let RetryState::RetryWait { attempt, .. } = self.state {
            self.state = RetryState::Attempting { attempt: attempt + 1 };
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn always_retry(_: &&str) -> FailureClass {
        FailureClass::Retryable
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(5000));
        assert_eq!(policy.delay_after(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_machine_walks_through_retries() {
        let mut machine = RetryMachine::new(RetryPolicy::with_max_retries(1));
        assert_eq!(machine.state(), RetryState::Attempting { attempt: 0 });

        let next = machine.fail(FailureClass::Retryable);
        assert_eq!(
            next,
            RetryState::RetryWait {
                attempt: 0,
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(machine.resume(), RetryState::Attempting { attempt: 1 });
        assert_eq!(machine.fail(FailureClass::Retryable), RetryState::Failed { attempts: 2 });
    }

    #[test]
    fn test_machine_permanent_failure_stops_immediately() {
        let mut machine = RetryMachine::new(RetryPolicy::with_max_retries(5));
        assert_eq!(machine.fail(FailureClass::Permanent), RetryState::Failed { attempts: 1 });
        // Terminal states ignore further transitions.
        assert_eq!(machine.resume(), RetryState::Failed { attempts: 1 });
        assert_eq!(machine.succeed(), RetryState::Failed { attempts: 1 });
    }

    #[test]
    fn test_machine_success_is_terminal() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        assert_eq!(machine.succeed(), RetryState::Succeeded);
        assert_eq!(machine.fail(FailureClass::Retryable), RetryState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_invokes_retries_plus_one() {
        let policy = RetryPolicy::with_max_retries(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), &str> = policy
            .execute(always_retry, |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("connection reset")
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "connection reset");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_returns_last_error() {
        let policy = RetryPolicy::with_max_retries(2);
        let result: Result<(), String> = policy
            .execute(|_| FailureClass::Retryable, |attempt| async move { Err(format!("failure {attempt}")) })
            .await;
        assert_eq!(result.unwrap_err(), "failure 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_permanent_failure_runs_once() {
        let policy = RetryPolicy::with_max_retries(3);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), &str> = policy
            .execute(
                |_| FailureClass::Permanent,
                |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err("syntax error")
                    }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_backoff_grows_between_attempts() {
        let policy = RetryPolicy::with_max_retries(2);
        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = stamps.clone();

        let result: Result<u8, &str> = policy
            .execute(always_retry, |attempt| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().push(Instant::now());
                    if attempt < 2 {
                        Err("connection timeout")
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 3);
        assert!(stamps[1] - stamps[0] >= Duration::from_millis(1000));
        assert!(stamps[2] - stamps[1] >= Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_execute_immediate_success() {
        let policy = RetryPolicy::default();
        let result: Result<i32, &str> = policy.execute(always_retry, |_| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
