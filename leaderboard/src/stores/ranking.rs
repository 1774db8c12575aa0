use std::sync::Arc;

use crate::error::StoreError;
use crate::redis::{Client, StoreOp};

pub const LEADERBOARD_KEY: &str = "leaderboard:global";

/// Op adding `delta` to a player's cumulative score, creating the entry
/// at 0 if absent. Deltas are non-negative in this domain; the applier's
/// validation enforces that, not the store.
pub fn increment_op(player_id: &str, delta: i64) -> StoreOp {
    StoreOp::ZIncrBy {
        key: LEADERBOARD_KEY.to_string(),
        member: player_id.to_string(),
        delta,
    }
}

/// Read side of the global ranking. Rank ties order by player id per the
/// backing sorted set, which is deterministic for a fixed store state.
#[derive(Clone)]
pub struct RankingStore {
    client: Arc<dyn Client + Send + Sync>,
}

impl RankingStore {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    /// Top `n` players as `(player_id, score)`, highest score first.
    pub async fn top_k(&self, n: usize) -> Result<Vec<(String, i64)>, StoreError> {
        if n == 0 {
            return Ok(vec![]);
        }
        self.client
            .zrevrange_withscores(LEADERBOARD_KEY, 0, n as isize - 1)
            .await
    }

    /// 0-based descending rank, `None` for unknown players.
    pub async fn rank(&self, player_id: &str) -> Result<Option<u64>, StoreError> {
        self.client.zrevrank(LEADERBOARD_KEY, player_id).await
    }

    pub async fn player_count(&self) -> Result<u64, StoreError> {
        self.client.zcard(LEADERBOARD_KEY).await
    }
}
