use std::sync::Arc;

use crate::error::StoreError;
use crate::event::AchievementRecord;
use crate::redis::{Client, StoreOp};

pub const ACHIEVEMENTS_KEY: &str = "achievements:recent";

/// Feed capacity: entries beyond the 100 most recent are evicted on
/// insert, FIFO by insertion order.
pub const FEED_CAPACITY: usize = 100;

/// Ops appending a record to the head of the feed and trimming the tail,
/// in the same batch: a push can momentarily exceed capacity inside the
/// transaction but never as observable state.
pub fn push_ops(record: &AchievementRecord) -> Result<Vec<StoreOp>, serde_json::Error> {
    Ok(vec![
        StoreOp::LPush {
            key: ACHIEVEMENTS_KEY.to_string(),
            value: serde_json::to_string(record)?,
        },
        StoreOp::LTrim {
            key: ACHIEVEMENTS_KEY.to_string(),
            keep: FEED_CAPACITY,
        },
    ])
}

#[derive(Clone)]
pub struct AchievementFeed {
    client: Arc<dyn Client + Send + Sync>,
}

impl AchievementFeed {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    /// Up to `limit` records, most recent first. Entries that fail to
    /// decode are counted and skipped rather than failing the read.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AchievementRecord>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let raw = self
            .client
            .lrange(ACHIEVEMENTS_KEY, 0, limit as isize - 1)
            .await?;

        let mut records = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str(&entry) {
                Ok(record) => records.push(record),
                Err(err) => {
                    metrics::counter!("leaderboard_feed_decode_errors_total").increment(1);
                    tracing::warn!("dropping undecodable feed entry: {}", err);
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::MockRedisClient;

    fn record(n: usize) -> AchievementRecord {
        AchievementRecord {
            player: format!("player_{n:03}"),
            achievement: "First Blood".to_string(),
            rarity: "common".to_string(),
            timestamp: format!("2024-03-01T12:00:{:02}Z", n % 60),
        }
    }

    #[tokio::test]
    async fn feed_is_bounded_and_newest_first() {
        let client: Arc<dyn Client + Send + Sync> = Arc::new(MockRedisClient::new());
        let feed = AchievementFeed::new(client.clone());

        for n in 0..150 {
            client.exec(push_ops(&record(n)).unwrap()).await.unwrap();
        }

        let records = feed.recent(1000).await.unwrap();
        assert_eq!(records.len(), FEED_CAPACITY);
        assert_eq!(records[0], record(149));
        assert_eq!(records[99], record(50));

        let recent = feed.recent(5).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0], record(149));
    }

    #[tokio::test]
    async fn undecodable_entries_are_skipped() {
        let client: Arc<dyn Client + Send + Sync> = Arc::new(MockRedisClient::new());
        client
            .exec(vec![StoreOp::LPush {
                key: ACHIEVEMENTS_KEY.to_string(),
                value: "not json".to_string(),
            }])
            .await
            .unwrap();
        client.exec(push_ops(&record(1)).unwrap()).await.unwrap();

        let feed = AchievementFeed::new(client);
        let records = feed.recent(10).await.unwrap();
        assert_eq!(records, vec![record(1)]);
    }
}
