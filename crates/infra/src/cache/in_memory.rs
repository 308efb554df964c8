use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{CacheError, CacheOp, CacheStore};

/// In-memory cache store.
///
/// Intended for tests/dev. A batch is applied under one write lock, so
/// readers never observe half of it.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    sets: RwLock<HashMap<String, BTreeMap<String, i64>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every key, as an eviction would.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.sets.write().map_err(|_| CacheError::Poisoned)?.clear();
        Ok(())
    }

    pub fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.sets.write().map_err(|_| CacheError::Poisoned)?.remove(key);
        Ok(())
    }

    pub fn key_count(&self) -> Result<usize, CacheError> {
        Ok(self.sets.read().map_err(|_| CacheError::Poisoned)?.len())
    }
}

impl CacheStore for InMemoryCacheStore {
    fn apply(&self, batch: &[CacheOp]) -> Result<(), CacheError> {
        let mut sets = self.sets.write().map_err(|_| CacheError::Poisoned)?;
        for op in batch {
            match op {
                CacheOp::Incr { key, member, delta } => {
                    *sets
                        .entry(key.clone())
                        .or_default()
                        .entry(member.clone())
                        .or_insert(0) += delta;
                }
                CacheOp::Replace { key, entries } => {
                    sets.insert(key.clone(), entries.iter().cloned().collect());
                }
            }
        }
        Ok(())
    }

    fn score_sum(&self, key: &str, members: &[String]) -> Result<i64, CacheError> {
        let sets = self.sets.read().map_err(|_| CacheError::Poisoned)?;
        let Some(set) = sets.get(key) else {
            return Ok(0);
        };
        Ok(members.iter().filter_map(|m| set.get(m)).sum())
    }

    fn entries(&self, key: &str) -> Result<BTreeMap<String, i64>, CacheError> {
        let sets = self.sets.read().map_err(|_| CacheError::Poisoned)?;
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    fn union(&self, keys: &[String]) -> Result<BTreeMap<String, i64>, CacheError> {
        let sets = self.sets.read().map_err(|_| CacheError::Poisoned)?;
        let mut out = BTreeMap::new();
        for set in keys.iter().filter_map(|k| sets.get(k)) {
            for (member, score) in set {
                *out.entry(member.clone()).or_insert(0) += score;
            }
        }
        Ok(out)
    }
}
