//! Two-tier cache: a process-local TTL tier in front of the shared remote tier.
//!
//! Both tiers are addressed by `namespace:key`. Writes go to both, deletes
//! clear both. A local entry never outlives `min(ttl, local cap)`, so a
//! process cannot serve a value the remote tier has already expired
//! elsewhere.
//!
//! Remote failures never reach the caller: every remote call returns a
//! `Result` whose error is logged, counted and dropped here, and the cache
//! degrades to local-only or always-miss behaviour.

use crate::local::TtlCache;
use crate::metrics;
use crate::remote::{RemoteCache, RemoteOp};
use orderly_config::CacheConfig;
use orderly_core::{OrderlyError, OrderlyResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call cache settings: how long entries live and where they live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Time to live of written entries.
    pub ttl: Duration,
    /// Namespace prefixed to every key.
    pub namespace: String,
}

impl CacheSettings {
    /// Creates settings for `namespace` with `ttl`.
    #[must_use]
    pub fn new(namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            ttl,
            namespace: namespace.into(),
        }
    }

    /// Same namespace, different TTL.
    #[must_use]
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        Self {
            ttl,
            namespace: self.namespace.clone(),
        }
    }

    /// The namespaced key both tiers use.
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.namespace.clone(), config.default_ttl())
    }
}

/// Snapshot of cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries held by the local tier.
    pub local_size: usize,
    /// Whether the remote tier answered its last call.
    pub remote_connected: bool,
}

/// Local TTL tier plus optional remote tier.
pub struct TwoTierCache {
    local: TtlCache<String>,
    remote: Option<Arc<dyn RemoteCache>>,
    local_ttl_cap: Duration,
}

impl TwoTierCache {
    /// Creates a cache. With `remote = None` the cache is local-only.
    #[must_use]
    pub fn new(remote: Option<Arc<dyn RemoteCache>>, local_capacity: usize, local_ttl_cap: Duration) -> Self {
        Self {
            local: TtlCache::new(local_capacity),
            remote,
            local_ttl_cap,
        }
    }

    /// Creates a cache sized from configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig, remote: Option<Arc<dyn RemoteCache>>) -> Self {
        Self::new(remote, config.local_capacity, config.local_ttl_cap())
    }

    /// TTL applied to the local copy of an entry written with `ttl`.
    #[must_use]
    pub fn local_ttl(&self, ttl: Duration) -> Duration {
        ttl.min(self.local_ttl_cap)
    }

    /// Looks `key` up, local tier first. Remote hits are copied into the local tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, settings: &CacheSettings) -> Option<T> {
        let full_key = settings.key(key);

        if let Some(raw) = self.local.get(&full_key) {
            if let Some(value) = decode(&full_key, &raw) {
                debug!(key = %full_key, "Cache hit (local)");
                metrics::record_hit("local");
                return Some(value);
            }
            self.local.remove(&full_key);
        }

        let Some(remote) = &self.remote else {
            metrics::record_miss();
            return None;
        };

        match remote.get(&full_key).await {
            Ok(Some(raw)) => {
                let Some(value) = decode(&full_key, &raw) else {
                    metrics::record_miss();
                    return None;
                };
                debug!(key = %full_key, "Cache hit (remote)");
                metrics::record_hit("remote");
                self.local.insert(full_key, raw, self.local_ttl(settings.ttl));
                Some(value)
            }
            Ok(None) => {
                debug!(key = %full_key, "Cache miss");
                metrics::record_miss();
                None
            }
            Err(e) => {
                swallow("get", &full_key, &e);
                metrics::record_miss();
                None
            }
        }
    }

    /// Writes `value` to the local tier, then to the remote tier.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, settings: &CacheSettings) {
        let full_key = settings.key(key);
        let Some(raw) = encode(&full_key, value) else {
            return;
        };

        self.local.insert(full_key.clone(), raw.clone(), self.local_ttl(settings.ttl));

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set_with_expiry(&full_key, &raw, settings.ttl).await {
                swallow("set", &full_key, &e);
            }
        }
    }

    /// Removes `key` from both tiers.
    pub async fn delete(&self, key: &str, settings: &CacheSettings) {
        let full_key = settings.key(key);
        self.local.remove(&full_key);

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(std::slice::from_ref(&full_key)).await {
                swallow("delete", &full_key, &e);
            }
        }
    }

    /// Looks up many keys with at most one remote round trip. Results follow `keys` order.
    pub async fn multi_get<T, K>(&self, keys: &[K], settings: &CacheSettings) -> Vec<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let full_keys: Vec<String> = keys.iter().map(|key| settings.key(key.as_ref())).collect();
        let mut results: Vec<Option<T>> = Vec::with_capacity(full_keys.len());
        let mut missing: Vec<usize> = Vec::new();

        for (index, full_key) in full_keys.iter().enumerate() {
            let value = self.local.get(full_key).and_then(|raw| decode(full_key, &raw));
            if value.is_some() {
                metrics::record_hit("local");
            } else {
                missing.push(index);
            }
            results.push(value);
        }

        if missing.is_empty() {
            return results;
        }

        let Some(remote) = &self.remote else {
            missing.iter().for_each(|_| metrics::record_miss());
            return results;
        };

        let remote_keys: Vec<String> = missing.iter().map(|&i| full_keys[i].clone()).collect();
        match remote.multi_get(&remote_keys).await {
            Ok(values) => {
                let local_ttl = self.local_ttl(settings.ttl);
                for (&index, raw) in missing.iter().zip(values) {
                    let full_key = &full_keys[index];
                    match raw.and_then(|raw| decode(full_key, &raw).map(|value| (raw, value))) {
                        Some((raw, value)) => {
                            metrics::record_hit("remote");
                            self.local.insert(full_key.clone(), raw, local_ttl);
                            results[index] = Some(value);
                        }
                        None => metrics::record_miss(),
                    }
                }
            }
            Err(e) => {
                swallow("multi_get", &remote_keys.join(","), &e);
                missing.iter().for_each(|_| metrics::record_miss());
            }
        }

        results
    }

    /// Writes many entries: local tier per key, remote tier in one pipeline.
    pub async fn multi_set<T, K>(&self, entries: &[(K, T)], settings: &CacheSettings)
    where
        T: Serialize,
        K: AsRef<str>,
    {
        let local_ttl = self.local_ttl(settings.ttl);
        let mut ops = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            let full_key = settings.key(key.as_ref());
            let Some(raw) = encode(&full_key, value) else {
                continue;
            };
            self.local.insert(full_key.clone(), raw.clone(), local_ttl);
            ops.push(RemoteOp::SetWithExpiry {
                key: full_key,
                value: raw,
                ttl: settings.ttl,
            });
        }

        if let Some(remote) = &self.remote {
            if ops.is_empty() {
                return;
            }
            let count = ops.len();
            if let Err(e) = remote.pipeline(ops).await {
                swallow("multi_set", &format!("{} keys", count), &e);
            }
        }
    }

    /// Deletes every entry matching a glob `pattern` within the namespace.
    ///
    /// The remote tier is matched with full glob semantics. The local tier is
    /// matched by substring on the pattern's literal fragment (the text before
    /// the first glob metacharacter).
    pub async fn invalidate_pattern(&self, pattern: &str, settings: &CacheSettings) {
        let namespace_prefix = settings.key("");
        let fragment = literal_fragment(pattern);
        let removed_local = self.local.remove_matching(|key| {
            key.strip_prefix(namespace_prefix.as_str())
                .is_some_and(|rest| rest.contains(fragment))
        });
        debug!(pattern = %pattern, removed_local, "Invalidated local cache entries");

        let Some(remote) = &self.remote else {
            return;
        };

        let full_pattern = settings.key(pattern);
        let result = async {
            let keys = remote.keys_matching(&full_pattern).await?;
            if keys.is_empty() {
                return Ok(0);
            }
            remote.delete(&keys).await
        }
        .await;

        match result {
            Ok(removed_remote) => debug!(pattern = %full_pattern, removed_remote, "Invalidated remote cache entries"),
            Err(e) => swallow("invalidate_pattern", &full_pattern, &e),
        }
    }

    /// Returns the cached value, or computes, caches and returns it.
    ///
    /// Only `factory` errors propagate; cache failures fall through to it.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, settings: &CacheSettings, factory: F) -> OrderlyResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrderlyResult<T>>,
    {
        if let Some(cached) = self.get::<T>(key, settings).await {
            return Ok(cached);
        }

        let value = factory().await?;
        self.set(key, &value, settings).await;
        Ok(value)
    }

    /// Empties the local tier only.
    pub fn clear_local(&self) {
        self.local.clear();
    }

    /// Current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_size: self.local.len(),
            remote_connected: self.remote.as_ref().is_some_and(|remote| remote.is_connected()),
        }
    }
}

impl std::fmt::Debug for TwoTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("local_size", &self.local.len())
            .field("local_capacity", &self.local.capacity())
            .field("local_ttl_cap", &self.local_ttl_cap)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

/// Text of `pattern` before its first glob metacharacter.
#[must_use]
pub fn literal_fragment(pattern: &str) -> &str {
    pattern
        .find(['*', '?', '[', '\\'])
        .map_or(pattern, |end| &pattern[..end])
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    serde_json::from_str(raw)
        .map_err(|e| warn!(key = %key, error = %e, "Discarding undecodable cache entry"))
        .ok()
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Option<String> {
    serde_json::to_string(value)
        .map_err(|e| warn!(key = %key, error = %e, "Skipping cache write for unserializable value"))
        .ok()
}

/// Drops a remote-tier error after recording it.
fn swallow(op: &'static str, key: &str, error: &OrderlyError) {
    warn!(op, key = %key, error = %error, "Remote cache operation failed; continuing without it");
    metrics::record_remote_error(op);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemoteCache;
    use crate::remote::MockRemoteCache;
    use ::metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        shop_id: i64,
        delay_threshold_days: u32,
    }

    fn settings() -> CacheSettings {
        CacheSettings::new("orderly", Duration::from_secs(60))
    }

    fn cache_with(remote: Arc<InMemoryRemoteCache>) -> TwoTierCache {
        TwoTierCache::new(Some(remote as Arc<dyn RemoteCache>), 100, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_set_then_get_hits_local_without_round_trip() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        let value = Settings {
            shop_id: 1,
            delay_threshold_days: 3,
        };

        cache.set("settings:1", &value, &settings()).await;
        let trips_after_set = remote.round_trips();

        let got: Option<Settings> = cache.get("settings:1", &settings()).await;
        assert_eq!(got, Some(value));
        assert_eq!(remote.round_trips(), trips_after_set);
    }

    #[tokio::test]
    async fn test_get_falls_back_to_remote_after_local_clear() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        cache.set("shop:9", &"acme.myshopify.com", &settings()).await;

        cache.clear_local();
        assert_eq!(cache.stats().local_size, 0);

        let got: Option<String> = cache.get("shop:9", &settings()).await;
        assert_eq!(got.as_deref(), Some("acme.myshopify.com"));
        // Refilled locally.
        assert_eq!(cache.stats().local_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_copy_is_capped_by_local_ttl() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = TwoTierCache::new(Some(remote.clone() as Arc<dyn RemoteCache>), 100, Duration::from_secs(10));
        let long = settings().with_ttl(Duration::from_secs(300));

        cache.set("k", &1u32, &long).await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let trips = remote.round_trips();
        assert_eq!(cache.get::<u32>("k", &long).await, Some(1));
        // Local copy expired, so the value came from the remote tier.
        assert_eq!(remote.round_trips(), trips + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_ttl_never_exceeds_entry_ttl() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        let short = settings().with_ttl(Duration::from_secs(5));
        assert_eq!(cache.local_ttl(short.ttl), Duration::from_secs(5));

        cache.set("k", &1u32, &short).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get::<u32>("k", &short).await, None);
    }

    #[tokio::test]
    async fn test_remote_failure_is_a_miss() {
        let mut remote = MockRemoteCache::new();
        remote
            .expect_get()
            .withf(|key: &str| key == "orderly:missing")
            .times(1)
            .returning(|_| Err(OrderlyError::Cache("connection refused".into())));
        remote.expect_is_connected().return_const(false);

        let cache = TwoTierCache::new(Some(Arc::new(remote)), 10, Duration::from_secs(30));
        let got: Option<String> = cache.get("missing", &settings()).await;
        assert_eq!(got, None);
        assert!(!cache.stats().remote_connected);
    }

    #[tokio::test]
    async fn test_remote_write_failure_keeps_local_copy() {
        let mut remote = MockRemoteCache::new();
        remote
            .expect_set_with_expiry()
            .times(1)
            .returning(|_, _, _| Err(OrderlyError::Cache("timeout".into())));
        remote.expect_get().times(0);

        let cache = TwoTierCache::new(Some(Arc::new(remote)), 10, Duration::from_secs(30));
        cache.set("k", &"v", &settings()).await;
        assert_eq!(cache.get::<String>("k", &settings()).await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_delete_clears_both_tiers() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        cache.set("k", &1u32, &settings()).await;

        cache.delete("k", &settings()).await;
        assert!(!remote.contains("orderly:k"));
        assert_eq!(cache.get::<u32>("k", &settings()).await, None);
    }

    #[tokio::test]
    async fn test_multi_get_uses_single_remote_call() {
        let mut remote = MockRemoteCache::new();
        remote
            .expect_multi_get()
            .withf(|keys: &[String]| keys.len() == 2 && keys[0] == "orderly:b" && keys[1] == "orderly:c")
            .times(1)
            .returning(|_| Ok(vec![Some("2".to_string()), None]));
        remote.expect_set_with_expiry().returning(|_, _, _| Ok(()));
        remote.expect_is_connected().return_const(true);

        let cache = TwoTierCache::new(Some(Arc::new(remote)), 10, Duration::from_secs(30));
        cache.set("a", &1u32, &settings()).await;

        let values: Vec<Option<u32>> = cache.multi_get(&["a", "b", "c"], &settings()).await;
        assert_eq!(values, vec![Some(1), Some(2), None]);
        assert_eq!(cache.stats().local_size, 2);
    }

    #[tokio::test]
    async fn test_multi_set_writes_one_pipeline() {
        let mut remote = MockRemoteCache::new();
        remote
            .expect_pipeline()
            .withf(|ops: &Vec<RemoteOp>| ops.len() == 2)
            .times(1)
            .returning(|_| Ok(()));

        let cache = TwoTierCache::new(Some(Arc::new(remote)), 10, Duration::from_secs(30));
        cache
            .multi_set(&[("x", 10u32), ("y", 20u32)], &settings())
            .await;

        let values: Vec<Option<u32>> = cache.multi_get(&["x", "y"], &settings()).await;
        assert_eq!(values, vec![Some(10), Some(20)]);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_scopes_to_matching_keys() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        let cfg = settings();
        cache.set("orders:42:shipped", &1u32, &cfg).await;
        cache.set("orders:42:processing", &2u32, &cfg).await;
        cache.set("other:1", &3u32, &cfg).await;

        cache.invalidate_pattern("orders:42:*", &cfg).await;

        assert!(!remote.contains("orderly:orders:42:shipped"));
        assert!(!remote.contains("orderly:orders:42:processing"));
        assert!(remote.contains("orderly:other:1"));
        assert_eq!(cache.stats().local_size, 1);
        assert_eq!(cache.get::<u32>("other:1", &cfg).await, Some(3));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_leaves_other_namespaces() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        let ours = settings();
        let theirs = CacheSettings::new("analytics", Duration::from_secs(60));
        cache.set("orders:42:a", &1u32, &ours).await;
        cache.set("orders:42:a", &1u32, &theirs).await;

        cache.invalidate_pattern("orders:42:*", &ours).await;

        assert!(remote.contains("analytics:orders:42:a"));
        assert_eq!(cache.get::<u32>("orders:42:a", &theirs).await, Some(1));
    }

    #[tokio::test]
    async fn test_local_only_mode() {
        let cache = TwoTierCache::new(None, 10, Duration::from_secs(30));
        cache.set("k", &"v", &settings()).await;
        assert_eq!(cache.get::<String>("k", &settings()).await.as_deref(), Some("v"));
        assert_eq!(
            cache.stats(),
            CacheStats {
                local_size: 1,
                remote_connected: false
            }
        );
    }

    #[tokio::test]
    async fn test_remote_outage_degrades_to_local_only() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        let cache = cache_with(remote.clone());
        remote.set_online(false);

        cache.set("k", &5u32, &settings()).await;
        assert_eq!(cache.get::<u32>("k", &settings()).await, Some(5));
        cache.invalidate_pattern("*", &settings()).await;
        assert_eq!(cache.get::<u32>("k", &settings()).await, None);
        assert!(!cache.stats().remote_connected);
    }

    #[tokio::test]
    async fn test_get_or_set_calls_factory_once() {
        let cache = cache_with(Arc::new(InMemoryRemoteCache::new()));
        let calls = std::sync::atomic::AtomicU32::new(0);

        for _ in 0..3 {
            let value: u32 = cache
                .get_or_set("count", &settings(), || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(99)
                })
                .await
                .unwrap();
            assert_eq!(value, 99);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let remote = Arc::new(InMemoryRemoteCache::new());
        remote
            .set_with_expiry("orderly:k", "not json", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = cache_with(remote);
        assert_eq!(cache.get::<u32>("k", &settings()).await, None);
    }

    /// Counts increments of the cache miss counter only.
    struct MissRecorder(Arc<AtomicU64>);

    impl Recorder for MissRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            if key.name() == crate::metrics::names::CACHE_MISSES_TOTAL {
                Counter::from_arc(Arc::clone(&self.0))
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_undecodable_remote_value_records_miss() {
        let misses = Arc::new(AtomicU64::new(0));
        let recorder = MissRecorder(Arc::clone(&misses));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let remote = Arc::new(InMemoryRemoteCache::new());
                remote
                    .set_with_expiry("orderly:k", "{broken", Duration::from_secs(60))
                    .await
                    .unwrap();
                let cache = cache_with(remote);
                assert_eq!(cache.get::<u32>("k", &settings()).await, None);
            })
        });

        assert_eq!(misses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_literal_fragment() {
        assert_eq!(literal_fragment("orders:42:*"), "orders:42:");
        assert_eq!(literal_fragment("shop:?:x"), "shop:");
        assert_eq!(literal_fragment("exact"), "exact");
        assert_eq!(literal_fragment("*"), "");
    }
}
