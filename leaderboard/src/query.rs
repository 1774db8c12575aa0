use std::sync::Arc;

use serde::Serialize;

use crate::error::QueryError;
use crate::event::AchievementRecord;
use crate::redis::Client;
use crate::stores::feed::AchievementFeed;
use crate::stores::profile::{PlayerProfile, ProfileStore};
use crate::stores::ranking::RankingStore;

/// Caps on read sizes, matching the feed capacity: asking for more than
/// the store retains is answered with what exists.
pub const MAX_TOP_N: usize = 100;
pub const MAX_FEED_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based, descending by score.
    pub rank: u64,
    pub player_id: String,
    pub player_name: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardView {
    pub total_players: u64,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub player_id: String,
    /// 1-based rank, absent until the player has scored.
    pub rank: Option<u64>,
    #[serde(flatten)]
    pub profile: PlayerProfile,
}

/// Synchronous read API over the ranking, profile and feed stores.
/// Readers observe a prefix of applied events; a single event's mutations
/// are never visible partially.
#[derive(Clone)]
pub struct QueryService {
    ranking: RankingStore,
    profiles: ProfileStore,
    feed: AchievementFeed,
}

impl QueryService {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self {
            ranking: RankingStore::new(client.clone()),
            profiles: ProfileStore::new(client.clone()),
            feed: AchievementFeed::new(client),
        }
    }

    /// Top `n` players with display names resolved from profiles. Players
    /// without a profile yet fall back to their id for display. Asking for
    /// zero returns an empty view.
    pub async fn leaderboard(&self, top_n: usize) -> Result<LeaderboardView, QueryError> {
        let top_n = top_n.min(MAX_TOP_N);
        let scores = self.ranking.top_k(top_n).await?;
        let total_players = self.ranking.player_count().await?;

        let mut entries = Vec::with_capacity(scores.len());
        for (position, (player_id, score)) in scores.into_iter().enumerate() {
            let player_name = self
                .profiles
                .get(&player_id)
                .await?
                .map(|p| p.player_name)
                .unwrap_or_else(|| player_id.clone());
            entries.push(LeaderboardEntry {
                rank: position as u64 + 1,
                player_id,
                player_name,
                score,
            });
        }

        Ok(LeaderboardView {
            total_players,
            entries,
        })
    }

    pub async fn player(&self, player_id: &str) -> Result<PlayerSummary, QueryError> {
        let profile = self
            .profiles
            .get(player_id)
            .await?
            .ok_or(QueryError::PlayerNotFound)?;
        let rank = self.ranking.rank(player_id).await?.map(|r| r + 1);

        Ok(PlayerSummary {
            player_id: player_id.to_string(),
            rank,
            profile,
        })
    }

    pub async fn recent_achievements(
        &self,
        limit: usize,
    ) -> Result<Vec<AchievementRecord>, QueryError> {
        Ok(self.feed.recent(limit.min(MAX_FEED_LIMIT)).await?)
    }
}
