use serde::{Deserialize, Serialize};

use crate::error::EventError;

pub const TYPE_PLAYER_SCORED: &str = "player_scored";
pub const TYPE_PLAYER_JOINED: &str = "player_joined";
pub const TYPE_ACHIEVEMENT_UNLOCKED: &str = "achievement_unlocked";

/// An event as it arrives from the transport. Every field is optional at
/// this stage: producers are not trusted, and schema validation happens in
/// [`RawGameEvent::validate`] so that a malformed record can be rejected
/// without tearing down the consumer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGameEvent {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: Option<String>,
    pub player_id: Option<String>,
    pub player_name: Option<String>,
    pub points: Option<i64>,
    pub action: Option<String>,
    pub game_id: Option<String>,
    pub achievement_name: Option<String>,
    pub achievement_rarity: Option<String>,
}

/// A validated event, ready for the applier. `event_id` is unique per
/// logical occurrence; redelivery preserves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvent {
    pub event_id: String,
    pub timestamp: String,
    pub player_id: String,
    pub player_name: String,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    ScoreIncrement {
        points: i64,
        action: String,
    },
    PlayerJoined {
        game_id: String,
    },
    AchievementUnlocked {
        name: String,
        rarity: String,
    },
}

impl EventData {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventData::ScoreIncrement { .. } => TYPE_PLAYER_SCORED,
            EventData::PlayerJoined { .. } => TYPE_PLAYER_JOINED,
            EventData::AchievementUnlocked { .. } => TYPE_ACHIEVEMENT_UNLOCKED,
        }
    }
}

fn required<T>(field: Option<T>, name: &'static str) -> Result<T, EventError> {
    field.ok_or(EventError::MissingField(name))
}

impl RawGameEvent {
    pub fn validate(self) -> Result<GameEvent, EventError> {
        let event_id = required(self.event_id, "event_id")?;
        let event_type = required(self.event_type, "event_type")?;
        let timestamp = required(self.timestamp, "timestamp")?;
        let player_id = required(self.player_id, "player_id")?;
        let player_name = required(self.player_name, "player_name")?;

        let data = match event_type.as_str() {
            TYPE_PLAYER_SCORED => {
                let points = required(self.points, "points")?;
                if points < 0 {
                    return Err(EventError::NegativePoints(points));
                }
                EventData::ScoreIncrement {
                    points,
                    action: self.action.unwrap_or_else(|| "unknown".to_string()),
                }
            }
            TYPE_PLAYER_JOINED => EventData::PlayerJoined {
                game_id: required(self.game_id, "game_id")?,
            },
            TYPE_ACHIEVEMENT_UNLOCKED => EventData::AchievementUnlocked {
                name: required(self.achievement_name, "achievement_name")?,
                rarity: required(self.achievement_rarity, "achievement_rarity")?,
            },
            _ => return Err(EventError::UnknownType(event_type)),
        };

        Ok(GameEvent {
            event_id,
            timestamp,
            player_id,
            player_name,
            data,
        })
    }
}

/// Immutable snapshot of an achievement unlock, as stored in the recent
/// feed. Field names match the wire format of the feed entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub player: String,
    pub achievement: String,
    pub rarity: String,
    pub timestamp: String,
}
