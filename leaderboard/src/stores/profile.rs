use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::StoreError;
use crate::redis::{Client, StoreOp};

pub const PLAYER_STATS_PREFIX: &str = "player:stats:";
const ACTION_FIELD_PREFIX: &str = "action:";

pub fn stats_key(player_id: &str) -> String {
    format!("{PLAYER_STATS_PREFIX}{player_id}")
}

/// A merge against one player's profile: numeric fields are additive,
/// scalar fields are overwrites. Field-level ops let concurrent partial
/// updates from different event types compose instead of clobbering each
/// other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDelta {
    pub player_name: Option<String>,
    pub last_active: Option<String>,
    pub last_game: Option<String>,
    pub score: i64,
    pub events: i64,
    pub games_joined: i64,
    pub actions: Vec<(String, i64)>,
}

/// Ops applying `delta` to one player's hash. Executed inside a single
/// atomic batch, so readers never observe a half-merged profile.
pub fn merge_ops(player_id: &str, delta: &ProfileDelta) -> Vec<StoreOp> {
    let key = stats_key(player_id);
    let mut ops = Vec::new();

    if delta.score != 0 {
        ops.push(StoreOp::HIncrBy {
            key: key.clone(),
            field: "total_score".to_string(),
            delta: delta.score,
        });
    }
    if delta.events != 0 {
        ops.push(StoreOp::HIncrBy {
            key: key.clone(),
            field: "events_count".to_string(),
            delta: delta.events,
        });
    }
    if delta.games_joined != 0 {
        ops.push(StoreOp::HIncrBy {
            key: key.clone(),
            field: "games_joined".to_string(),
            delta: delta.games_joined,
        });
    }
    for (action, count) in &delta.actions {
        ops.push(StoreOp::HIncrBy {
            key: key.clone(),
            field: format!("{ACTION_FIELD_PREFIX}{action}"),
            delta: *count,
        });
    }
    if let Some(name) = &delta.player_name {
        ops.push(StoreOp::HSet {
            key: key.clone(),
            field: "player_name".to_string(),
            value: name.clone(),
        });
    }
    if let Some(ts) = &delta.last_active {
        ops.push(StoreOp::HSet {
            key: key.clone(),
            field: "last_active".to_string(),
            value: ts.clone(),
        });
    }
    if let Some(game) = &delta.last_game {
        ops.push(StoreOp::HSet {
            key,
            field: "last_game".to_string(),
            value: game.clone(),
        });
    }

    ops
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerProfile {
    pub player_name: String,
    pub total_score: i64,
    pub events_count: i64,
    pub games_joined: i64,
    pub last_active: Option<String>,
    pub last_game: Option<String>,
    /// Per-action tallies, e.g. `kill -> 3`.
    pub actions: BTreeMap<String, i64>,
}

#[derive(Clone)]
pub struct ProfileStore {
    client: Arc<dyn Client + Send + Sync>,
}

impl ProfileStore {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    /// Full profile for a player, `None` if no event ever referenced them.
    pub async fn get(&self, player_id: &str) -> Result<Option<PlayerProfile>, StoreError> {
        let fields = self.client.hgetall(&stats_key(player_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let numeric = |field: &str| -> i64 {
            fields
                .get(field)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default()
        };
        let actions = fields
            .iter()
            .filter_map(|(field, value)| {
                let action = field.strip_prefix(ACTION_FIELD_PREFIX)?;
                Some((action.to_string(), value.parse().ok()?))
            })
            .collect();

        Ok(Some(PlayerProfile {
            player_name: fields
                .get("player_name")
                .cloned()
                .unwrap_or_else(|| player_id.to_string()),
            total_score: numeric("total_score"),
            events_count: numeric("events_count"),
            games_joined: numeric("games_joined"),
            last_active: fields.get("last_active").cloned(),
            last_game: fields.get("last_game").cloned(),
            actions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::MockRedisClient;

    #[tokio::test]
    async fn merges_accumulate_per_field() {
        let client: Arc<dyn Client + Send + Sync> = Arc::new(MockRedisClient::new());
        let store = ProfileStore::new(client.clone());

        let scored = ProfileDelta {
            player_name: Some("NightHawk".to_string()),
            last_active: Some("2024-03-01T12:00:00Z".to_string()),
            score: 100,
            events: 1,
            actions: vec![("kill".to_string(), 1)],
            ..Default::default()
        };
        client.exec(merge_ops("player_001", &scored)).await.unwrap();
        client.exec(merge_ops("player_001", &scored)).await.unwrap();

        let joined = ProfileDelta {
            player_name: Some("NightHawk".to_string()),
            last_active: Some("2024-03-01T12:01:00Z".to_string()),
            last_game: Some("game_alpha".to_string()),
            events: 1,
            games_joined: 1,
            ..Default::default()
        };
        client.exec(merge_ops("player_001", &joined)).await.unwrap();

        let profile = store.get("player_001").await.unwrap().expect("profile");
        assert_eq!(profile.total_score, 200);
        assert_eq!(profile.events_count, 3);
        assert_eq!(profile.games_joined, 1);
        assert_eq!(profile.actions.get("kill"), Some(&2));
        assert_eq!(profile.last_game.as_deref(), Some("game_alpha"));
        assert_eq!(profile.last_active.as_deref(), Some("2024-03-01T12:01:00Z"));
    }

    #[tokio::test]
    async fn unknown_player_is_none() {
        let store = ProfileStore::new(Arc::new(MockRedisClient::new()));
        assert_eq!(store.get("player_404").await.unwrap(), None);
    }
}
