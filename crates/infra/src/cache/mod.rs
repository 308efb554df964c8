//! Derived quantity cache store.
//!
//! A key/score store addressed by string keys, each holding a map of member to
//! signed score. Backends only need atomic increments, multi-member reads and
//! an aggregate union; batches are applied as one pipelined unit.

pub mod in_memory;
pub mod keys;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

pub use in_memory::InMemoryCacheStore;
pub use keys::{Bucket, CacheKeys};
#[cfg(feature = "redis")]
pub use redis_store::RedisCacheStore;

/// One write in a cache batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// Add `delta` to `member`'s score under `key`.
    Incr {
        key: String,
        member: String,
        delta: i64,
    },
    /// Replace everything under `key` with `entries`.
    Replace {
        key: String,
        entries: Vec<(String, i64)>,
    },
}

impl CacheOp {
    pub fn key(&self) -> &str {
        match self {
            CacheOp::Incr { key, .. } | CacheOp::Replace { key, .. } => key,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),

    #[error("cache entry could not be decoded: {0}")]
    Decode(String),

    #[error("cache lock poisoned")]
    Poisoned,
}

/// Store-agnostic cache contract.
pub trait CacheStore: Send + Sync {
    /// Apply a batch in order, as one pipelined unit.
    fn apply(&self, batch: &[CacheOp]) -> Result<(), CacheError>;

    /// Sum of the scores of `members` under `key` (missing members count as 0).
    fn score_sum(&self, key: &str, members: &[String]) -> Result<i64, CacheError>;

    /// Every member and score under `key`.
    fn entries(&self, key: &str) -> Result<BTreeMap<String, i64>, CacheError>;

    /// Member-wise sum of the scores under every key in `keys`.
    fn union(&self, keys: &[String]) -> Result<BTreeMap<String, i64>, CacheError>;
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    fn apply(&self, batch: &[CacheOp]) -> Result<(), CacheError> {
        (**self).apply(batch)
    }

    fn score_sum(&self, key: &str, members: &[String]) -> Result<i64, CacheError> {
        (**self).score_sum(key, members)
    }

    fn entries(&self, key: &str) -> Result<BTreeMap<String, i64>, CacheError> {
        (**self).entries(key)
    }

    fn union(&self, keys: &[String]) -> Result<BTreeMap<String, i64>, CacheError> {
        (**self).union(keys)
    }
}

/// Open the backend selected by `config`: Redis when a URL is configured,
/// otherwise a process-local store.
pub fn open_store(config: &crate::config::EngineConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = RedisCacheStore::new(url, &config.cache_prefix)?;
            tracing::info!(prefix = %config.cache_prefix, "using redis quantity cache");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL is set but the `redis` feature is disabled; using in-memory cache");
            Ok(Arc::new(InMemoryCacheStore::new()))
        }
        None => {
            tracing::debug!("using in-memory quantity cache");
            Ok(Arc::new(InMemoryCacheStore::new()))
        }
    }
}
