use std::sync::Arc;

use crate::error::StoreError;
use crate::event::{AchievementRecord, EventData, GameEvent};
use crate::redis::{Client, StoreOp};
use crate::stores::dedup::DedupLedger;
use crate::stores::profile::ProfileDelta;
use crate::stores::{feed, profile, ranking};

/// Result of pushing one event through the idempotency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting, state mutated and event marked.
    Applied,
    /// Already applied on an earlier delivery, absorbed without mutation.
    Duplicate,
}

/// The aggregation core: turns one validated event into the store
/// mutations it implies and commits them.
///
/// Planning is a pure function of the event. Commit bundles the planned
/// mutations with the dedup mark into a single atomic batch, so the mark
/// can never land without the mutations nor the other way around. A crash
/// at any point therefore leaves either no trace of the event or all of
/// it, and redelivery is absorbed by the gate.
#[derive(Clone)]
pub struct EventApplier {
    client: Arc<dyn Client + Send + Sync>,
    ledger: DedupLedger,
}

impl EventApplier {
    pub fn new(client: Arc<dyn Client + Send + Sync>, ledger: DedupLedger) -> Self {
        Self { client, ledger }
    }

    /// The store mutations implied by `event`, in commit order.
    pub fn plan(event: &GameEvent) -> Result<Vec<StoreOp>, StoreError> {
        let mut ops = Vec::new();
        match &event.data {
            EventData::ScoreIncrement { points, action } => {
                ops.push(ranking::increment_op(&event.player_id, *points));
                let delta = ProfileDelta {
                    player_name: Some(event.player_name.clone()),
                    last_active: Some(event.timestamp.clone()),
                    score: *points,
                    events: 1,
                    actions: vec![(action.clone(), 1)],
                    ..Default::default()
                };
                ops.extend(profile::merge_ops(&event.player_id, &delta));
            }
            EventData::PlayerJoined { game_id } => {
                // The most recent join is authoritative for the display name.
                let delta = ProfileDelta {
                    player_name: Some(event.player_name.clone()),
                    last_active: Some(event.timestamp.clone()),
                    last_game: Some(game_id.clone()),
                    events: 1,
                    games_joined: 1,
                    ..Default::default()
                };
                ops.extend(profile::merge_ops(&event.player_id, &delta));
            }
            EventData::AchievementUnlocked { name, rarity } => {
                let delta = ProfileDelta {
                    last_active: Some(event.timestamp.clone()),
                    events: 1,
                    ..Default::default()
                };
                ops.extend(profile::merge_ops(&event.player_id, &delta));
                let record = AchievementRecord {
                    player: event.player_name.clone(),
                    achievement: name.clone(),
                    rarity: rarity.clone(),
                    timestamp: event.timestamp.clone(),
                };
                ops.extend(feed::push_ops(&record)?);
            }
        }
        Ok(ops)
    }

    /// Gate, plan, commit. Safe to call any number of times with the same
    /// event: only the first call mutates state.
    pub async fn apply(&self, event: &GameEvent) -> Result<Outcome, StoreError> {
        if self.ledger.is_processed(&event.event_id).await? {
            return Ok(Outcome::Duplicate);
        }

        let mut ops = Self::plan(event)?;
        ops.extend(self.ledger.mark_ops(&event.event_id));
        self.client.exec(ops).await?;

        Ok(Outcome::Applied)
    }
}
