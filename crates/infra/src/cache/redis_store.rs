//! Redis sorted-set cache store.
//!
//! Each cache key is a sorted set (`ZINCRBY` for increments, `ZSCORE` and
//! `ZRANGE ... WITHSCORES` for reads, `ZUNIONSTORE` for aggregate reads). A
//! batch is sent as one `MULTI`/`EXEC` pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use super::{CacheError, CacheOp, CacheStore};

#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    client: Arc<redis::Client>,
    /// Namespace for scratch keys used by `union`.
    scratch_prefix: String,
}

impl RedisCacheStore {
    /// Open a client for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// No connection is made until the first command.
    pub fn new(redis_url: impl AsRef<str>, prefix: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            scratch_prefix: format!("{prefix}:scratch"),
        })
    }

    fn connection(&self) -> Result<redis::Connection, CacheError> {
        self.client
            .get_connection()
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

fn to_score(score: f64) -> i64 {
    score.round() as i64
}

impl CacheStore for RedisCacheStore {
    #[instrument(skip(self, batch), fields(ops = batch.len()), err)]
    fn apply(&self, batch: &[CacheOp]) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch {
            match op {
                CacheOp::Incr { key, member, delta } => {
                    pipe.cmd("ZINCRBY").arg(key).arg(*delta).arg(member).ignore();
                }
                CacheOp::Replace { key, entries } => {
                    pipe.cmd("DEL").arg(key).ignore();
                    if !entries.is_empty() {
                        pipe.cmd("ZADD").arg(key);
                        for (member, score) in entries {
                            pipe.arg(*score).arg(member);
                        }
                        pipe.ignore();
                    }
                }
            }
        }

        let mut conn = self.connection()?;
        pipe.query::<()>(&mut conn)
            .map_err(|e| CacheError::Command(format!("batch failed: {e}")))
    }

    #[instrument(skip(self, members), fields(members = members.len()), err)]
    fn score_sum(&self, key: &str, members: &[String]) -> Result<i64, CacheError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for member in members {
            pipe.cmd("ZSCORE").arg(key).arg(member);
        }

        let mut conn = self.connection()?;
        let scores: Vec<Option<f64>> = pipe
            .query(&mut conn)
            .map_err(|e| CacheError::Command(format!("ZSCORE failed: {e}")))?;
        Ok(scores.into_iter().flatten().map(to_score).sum())
    }

    #[instrument(skip(self), err)]
    fn entries(&self, key: &str) -> Result<BTreeMap<String, i64>, CacheError> {
        let mut conn = self.connection()?;
        let pairs: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query(&mut conn)
            .map_err(|e| CacheError::Command(format!("ZRANGE failed: {e}")))?;
        Ok(pairs.into_iter().map(|(m, s)| (m, to_score(s))).collect())
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()), err)]
    fn union(&self, keys: &[String]) -> Result<BTreeMap<String, i64>, CacheError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let scratch = format!("{}:{}", self.scratch_prefix, Uuid::now_v7());

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZUNIONSTORE").arg(&scratch).arg(keys.len()).arg(keys).ignore();
        pipe.cmd("ZRANGE").arg(&scratch).arg(0).arg(-1).arg("WITHSCORES");
        pipe.cmd("DEL").arg(&scratch).ignore();

        let mut conn = self.connection()?;
        let (pairs,): (Vec<(String, f64)>,) = pipe
            .query(&mut conn)
            .map_err(|e| CacheError::Command(format!("ZUNIONSTORE failed: {e}")))?;
        Ok(pairs.into_iter().map(|(m, s)| (m, to_score(s))).collect())
    }
}
