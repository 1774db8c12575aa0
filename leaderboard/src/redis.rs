use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::timeout;

use crate::error::StoreError;

// Writes carry a whole event's mutation batch, reads are point lookups.
const REDIS_TIMEOUT_MILLISECS: u64 = 2000;

/// One write command against the backing store. The applier describes an
/// event's effects as a sequence of these; [`Client::exec`] commits the
/// sequence atomically, so the dedup mark at the tail of a batch can never
/// become visible before the state mutations it guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Add `delta` to `member`'s score in a sorted set, creating it at 0.
    ZIncrBy {
        key: String,
        member: String,
        delta: i64,
    },
    /// Add `delta` to a numeric hash field, creating it at 0.
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Overwrite a hash field.
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Prepend to a list.
    LPush { key: String, value: String },
    /// Keep only the first `keep` entries of a list.
    LTrim { key: String, keep: usize },
    /// Insert into a set.
    SAdd { key: String, member: String },
    /// Refresh a key's time-to-live.
    Expire { key: String, seconds: u64 },
}

/// The store primitives the pipeline consumes: an ordered numeric
/// collection, a field-mapping collection, a bounded insertion-ordered
/// sequence and a set-membership primitive, plus atomic write batches.
/// Anything honoring these contracts can back the leaderboard.
#[async_trait]
pub trait Client {
    /// Commit a batch of writes atomically: either every op in the batch
    /// is applied, or none is.
    async fn exec(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Members ordered by score, highest first, over the inclusive index
    /// range. Ties order by member id, descending, matching ZREVRANGE.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// 0-based rank in descending score order, `None` if absent.
    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError>;

    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;
}

pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub fn new(addr: String) -> Result<RedisClient, StoreError> {
        let client = redis::Client::open(addr).map_err(StoreError::Command)?;
        Ok(RedisClient { client })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn exec(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            for op in &ops {
                match op {
                    StoreOp::ZIncrBy { key, member, delta } => {
                        pipe.zincr(key, member, *delta).ignore();
                    }
                    StoreOp::HIncrBy { key, field, delta } => {
                        pipe.hincr(key, field, *delta).ignore();
                    }
                    StoreOp::HSet { key, field, value } => {
                        pipe.hset(key, field, value).ignore();
                    }
                    StoreOp::LPush { key, value } => {
                        pipe.lpush(key, value).ignore();
                    }
                    StoreOp::LTrim { key, keep } => {
                        pipe.ltrim(key, 0, *keep as isize - 1).ignore();
                    }
                    StoreOp::SAdd { key, member } => {
                        pipe.sadd(key, member).ignore();
                    }
                    StoreOp::Expire { key, seconds } => {
                        pipe.expire(key, *seconds as usize).ignore();
                    }
                }
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
            Ok::<(), redis::RedisError>(())
        };
        timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??;
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.sismember(key, member).await
        };
        Ok(timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??)
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.zrevrange_withscores(key, start, stop).await
        };
        Ok(timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??)
    }

    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.zrevrank(key, member).await
        };
        Ok(timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.zcard(key).await
        };
        Ok(timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.hgetall(key).await
        };
        Ok(timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??)
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let fut = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.lrange(key, start, stop).await
        };
        Ok(timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), fut).await??)
    }
}

#[derive(Default)]
struct MockState {
    zsets: HashMap<String, HashMap<String, i64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, HashSet<String>>,
    ttls: HashMap<String, u64>,
    unavailable: bool,
}

impl MockState {
    fn sorted_desc(&self, key: &str) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = self
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        // Highest score first; ties order by member id descending, which is
        // what ZREVRANGE does for equal scores.
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        entries
    }

    fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::ZIncrBy { key, member, delta } => {
                *self
                    .zsets
                    .entry(key.clone())
                    .or_default()
                    .entry(member.clone())
                    .or_insert(0) += delta;
            }
            StoreOp::HIncrBy { key, field, delta } => {
                let hash = self.hashes.entry(key.clone()).or_default();
                let current: i64 = hash
                    .get(field)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                drop(hash.insert(field.clone(), (current + delta).to_string()));
            }
            StoreOp::HSet { key, field, value } => {
                drop(
                    self.hashes
                        .entry(key.clone())
                        .or_default()
                        .insert(field.clone(), value.clone()),
                );
            }
            StoreOp::LPush { key, value } => {
                self.lists.entry(key.clone()).or_default().insert(0, value.clone());
            }
            StoreOp::LTrim { key, keep } => {
                if let Some(list) = self.lists.get_mut(key) {
                    list.truncate(*keep);
                }
            }
            StoreOp::SAdd { key, member } => {
                _ = self
                    .sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone());
            }
            StoreOp::Expire { key, seconds } => {
                _ = self.ttls.insert(key.clone(), *seconds);
            }
        }
    }
}

/// In-memory implementation of [`Client`] with real command semantics, so
/// tests can drive the same gate/apply path the Kafka loop uses without a
/// running store.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRedisClient {
    pub fn new() -> MockRedisClient {
        Default::default()
    }

    /// Make every subsequent command fail, to exercise the
    /// replay-from-checkpoint paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().expect("poisoned mock store").unavailable = unavailable;
    }

    /// Last TTL set on a key, if any.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.state
            .lock()
            .expect("poisoned mock store")
            .ttls
            .get(key)
            .copied()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, MockState>, StoreError> {
        let state = self.state.lock().expect("poisoned mock store");
        if state.unavailable {
            return Err(StoreError::Unavailable("mock store is down".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn exec(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        // One lock across the whole batch: all-or-nothing, like MULTI/EXEC.
        let mut state = self.locked()?;
        for op in &ops {
            state.apply(op);
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let state = self.locked()?;
        Ok(state.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let state = self.locked()?;
        let entries = state.sorted_desc(key);
        if start < 0 || stop < start {
            return Ok(vec![]);
        }
        let stop = (stop as usize + 1).min(entries.len());
        let start = (start as usize).min(stop);
        Ok(entries[start..stop].to_vec())
    }

    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        let state = self.locked()?;
        Ok(state
            .sorted_desc(key)
            .iter()
            .position(|(m, _)| m == member)
            .map(|p| p as u64))
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let state = self.locked()?;
        Ok(state.zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self.locked()?;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.locked()?;
        let list = state.lists.get(key).cloned().unwrap_or_default();
        if start < 0 || stop < start {
            return Ok(vec![]);
        }
        let stop = (stop as usize + 1).min(list.len());
        let start = (start as usize).min(stop);
        Ok(list[start..stop].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zincrby_accumulates_and_orders() {
        let client = MockRedisClient::new();
        client
            .exec(vec![
                StoreOp::ZIncrBy {
                    key: "lb".to_string(),
                    member: "a".to_string(),
                    delta: 100,
                },
                StoreOp::ZIncrBy {
                    key: "lb".to_string(),
                    member: "b".to_string(),
                    delta: 300,
                },
                StoreOp::ZIncrBy {
                    key: "lb".to_string(),
                    member: "a".to_string(),
                    delta: 50,
                },
            ])
            .await
            .unwrap();

        let top = client.zrevrange_withscores("lb", 0, 9).await.unwrap();
        assert_eq!(
            top,
            vec![("b".to_string(), 300), ("a".to_string(), 150)]
        );
        assert_eq!(client.zrevrank("lb", "a").await.unwrap(), Some(1));
        assert_eq!(client.zrevrank("lb", "missing").await.unwrap(), None);
        assert_eq!(client.zcard("lb").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn lpush_ltrim_keeps_newest_first() {
        let client = MockRedisClient::new();
        for i in 0..5 {
            client
                .exec(vec![
                    StoreOp::LPush {
                        key: "feed".to_string(),
                        value: format!("r{i}"),
                    },
                    StoreOp::LTrim {
                        key: "feed".to_string(),
                        keep: 3,
                    },
                ])
                .await
                .unwrap();
        }
        let entries = client.lrange("feed", 0, 99).await.unwrap();
        assert_eq!(entries, vec!["r4", "r3", "r2"]);
    }

    #[tokio::test]
    async fn unavailable_store_fails_everything() {
        let client = MockRedisClient::new();
        client.set_unavailable(true);
        assert!(client.exec(vec![]).await.is_err());
        assert!(client.sismember("s", "m").await.is_err());
        client.set_unavailable(false);
        assert!(client.sismember("s", "m").await.is_ok());
    }
}
