//! In-memory pool fake for executor tests.

use crate::connection::{Connection, ConnectionPool, PoolStats};
use crate::row::RowSet;
use async_trait::async_trait;
use orderly_core::{OrderlyError, OrderlyResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Responder = dyn Fn(&str, &[Value]) -> OrderlyResult<RowSet> + Send + Sync;

#[derive(Default)]
struct Shared {
    statements: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Duration>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    discards: AtomicUsize,
}

/// Pool whose connections answer every statement through one closure.
///
/// Transaction control statements go through the closure too; the
/// `SET statement_timeout` preamble is logged but always succeeds.
pub struct FakePool {
    shared: Arc<Shared>,
    responder: Arc<Responder>,
    query_delay: Duration,
}

impl FakePool {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> OrderlyResult<RowSet> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::default(),
            responder: Arc::new(responder),
            query_delay: Duration::ZERO,
        }
    }

    /// Every statement answers with an empty row set.
    pub fn ok() -> Self {
        Self::new(|_, _| Ok(RowSet::default()))
    }

    /// Fails statements whose text contains `needle`.
    pub fn failing_on(needle: &'static str, message: &'static str) -> Self {
        Self::new(move |statement, _| {
            if statement.contains(needle) {
                Err(OrderlyError::database(message))
            } else {
                Ok(RowSet::default())
            }
        })
    }

    /// Each query sleeps for `delay` before answering.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.shared.statements.lock().clone()
    }

    /// Statements other than the `SET statement_timeout` preamble.
    pub fn issued(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| !s.starts_with("SET "))
            .collect()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.shared.timeouts.lock().clone()
    }

    pub fn acquires(&self) -> usize {
        self.shared.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }

    pub fn discards(&self) -> usize {
        self.shared.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    async fn acquire(&self) -> OrderlyResult<Box<dyn Connection>> {
        self.shared.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            shared: Arc::clone(&self.shared),
            responder: Arc::clone(&self.responder),
            query_delay: self.query_delay,
        }))
    }

    fn stats(&self) -> PoolStats {
        let borrowed = self
            .acquires()
            .saturating_sub(self.releases() + self.discards());
        PoolStats {
            total: 4,
            idle: 4usize.saturating_sub(borrowed),
            waiting: 0,
        }
    }
}

struct FakeConnection {
    shared: Arc<Shared>,
    responder: Arc<Responder>,
    query_delay: Duration,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn query(&mut self, statement: &str, params: &[Value]) -> OrderlyResult<RowSet> {
        self.shared.statements.lock().push(statement.to_string());
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        (self.responder)(statement, params)
    }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> OrderlyResult<()> {
        self.shared.timeouts.lock().push(timeout);
        self.shared
            .statements
            .lock()
            .push(format!("SET statement_timeout = {}", timeout.as_millis()));
        Ok(())
    }

    fn release(&mut self) {
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn discard(&mut self) {
        self.shared.discards.fetch_add(1, Ordering::SeqCst);
    }
}
