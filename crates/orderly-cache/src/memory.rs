//! In-process stand-in for the remote cache service.
//!
//! Behaves like the shared store (server-side expiry, glob key matching)
//! and counts round trips, so it can back single-process deployments and
//! tests. It can be switched offline to simulate an outage.

use crate::remote::{RemoteCache, RemoteOp};
use async_trait::async_trait;
use orderly_core::{OrderlyError, OrderlyResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Remote cache kept in process memory.
#[derive(Debug)]
pub struct InMemoryRemoteCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    online: AtomicBool,
    round_trips: AtomicUsize,
}

impl Default for InMemoryRemoteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteCache {
    /// Creates an empty, online store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            round_trips: AtomicUsize::new(0),
        }
    }

    /// Takes the store offline (every call fails) or back online.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Whether a live entry exists, without counting a round trip.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|(_, expires_at)| now < *expires_at)
    }

    fn enter(&self) -> OrderlyResult<()> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrderlyError::Cache("remote cache unreachable".to_string()))
        }
    }

    fn live_value(entries: &mut HashMap<String, (String, Instant)>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some((value, expires_at)) if now < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemoteCache {
    async fn get(&self, key: &str) -> OrderlyResult<Option<String>> {
        self.enter()?;
        Ok(Self::live_value(&mut self.entries.lock(), key, Instant::now()))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> OrderlyResult<()> {
        self.enter()?;
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> OrderlyResult<u64> {
        self.enter()?;
        let mut entries = self.entries.lock();
        Ok(keys.iter().filter(|key| entries.remove(key.as_str()).is_some()).count() as u64)
    }

    async fn multi_get(&self, keys: &[String]) -> OrderlyResult<Vec<Option<String>>> {
        self.enter()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| Self::live_value(&mut entries, key, now))
            .collect())
    }

    async fn keys_matching(&self, pattern: &str) -> OrderlyResult<Vec<String>> {
        self.enter()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, (_, expires_at))| now < *expires_at && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<RemoteOp>) -> OrderlyResult<()> {
        self.enter()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        for op in ops {
            match op {
                RemoteOp::SetWithExpiry { key, value, ttl } => {
                    entries.insert(key, (value, now + ttl));
                }
                RemoteOp::Delete { keys } => {
                    for key in keys {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> OrderlyResult<()> {
        self.enter()
    }

    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    let Some((&head, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match head {
        '*' => (0..=text.len()).any(|skip| glob_match_from(rest, &text[skip..])),
        '?' => !text.is_empty() && glob_match_from(rest, &text[1..]),
        '[' => {
            let Some((&ch, text_rest)) = text.split_first() else {
                return false;
            };
            match match_class(rest, ch) {
                Some((true, after)) => glob_match_from(after, text_rest),
                Some((false, _)) => false,
                // Unterminated class: treat '[' literally.
                None => ch == '[' && glob_match_from(rest, text_rest),
            }
        }
        '\\' if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match_from(&rest[1..], &text[1..])
        }
        literal => text.first() == Some(&literal) && glob_match_from(rest, &text[1..]),
    }
}

/// Matches `ch` against a class body (after `[`). Returns the verdict and the
/// pattern remainder after `]`.
fn match_class(body: &[char], ch: char) -> Option<(bool, &[char])> {
    let (negated, mut i) = match body.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while i < body.len() {
        match body[i] {
            ']' => return Some((matched != negated, &body[i + 1..])),
            '\\' if i + 1 < body.len() => {
                matched |= body[i + 1] == ch;
                i += 2;
            }
            lo if i + 2 < body.len() && body[i + 1] == '-' && body[i + 2] != ']' => {
                let hi = body[i + 2];
                matched |= (lo.min(hi)..=lo.max(hi)).contains(&ch);
                i += 3;
            }
            literal => {
                matched |= literal == ch;
                i += 1;
            }
        }
    }
    None
}
