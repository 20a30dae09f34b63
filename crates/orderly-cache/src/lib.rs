//! # Orderly Cache
//!
//! Caching infrastructure shielding the relational store from repeated
//! reads: a bounded local TTL cache, the remote cache boundary with a Redis
//! implementation, and the [`TwoTierCache`] facade combining both.

pub mod cache_keys;
pub mod local;
pub mod memory;
pub mod metrics;
pub mod redis_cache;
pub mod remote;
pub mod two_tier;

pub use local::TtlCache;
pub use memory::InMemoryRemoteCache;
pub use redis_cache::RedisRemoteCache;
pub use remote::{RemoteCache, RemoteOp};
pub use two_tier::{CacheSettings, CacheStats, TwoTierCache};
