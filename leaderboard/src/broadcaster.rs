use std::future::Future;
use std::time::Duration;

use health::HealthHandle;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::event::AchievementRecord;
use crate::query::{LeaderboardView, QueryService};

/// How much of the state each push carries.
const SNAPSHOT_TOP_N: usize = 10;
const SNAPSHOT_FEED_LIMIT: usize = 5;

/// Receivers that fall this far behind drop old updates; only the latest
/// snapshot matters to an observer anyway.
const CHANNEL_CAPACITY: usize = 16;

/// Point-in-time capture of the read side. Compared structurally between
/// ticks; the emission timestamp deliberately lives outside of it so a
/// quiescent leaderboard compares equal tick after tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub leaderboard: LeaderboardView,
    pub recent_achievements: Vec<AchievementRecord>,
}

/// One push to observers: a changed snapshot plus when it was taken.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotUpdate {
    pub updated_at: String,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Periodically snapshots the leaderboard and pushes to subscribers only
/// when the content changed. Runs independently of the write path: bursts
/// of events collapse into at most one push per tick, and a quiet stream
/// produces no pushes at all. Subscribers joining mid-stream receive the
/// next emission, at most one tick away.
pub struct SnapshotBroadcaster {
    query: QueryService,
    interval: Duration,
    sender: broadcast::Sender<SnapshotUpdate>,
    liveness: HealthHandle,
}

impl SnapshotBroadcaster {
    pub fn new(
        query: QueryService,
        interval: Duration,
        sender: broadcast::Sender<SnapshotUpdate>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            query,
            interval,
            sender,
            liveness,
        }
    }

    pub fn channel() -> (
        broadcast::Sender<SnapshotUpdate>,
        broadcast::Receiver<SnapshotUpdate>,
    ) {
        broadcast::channel(CHANNEL_CAPACITY)
    }

    /// Tick until `shutdown` resolves. The previous snapshot is owned by
    /// this task, so independent broadcaster instances stay independent.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        info!("snapshot broadcaster starting");
        let mut ticker = tokio::time::interval(self.interval);
        let mut previous: Option<Snapshot> = None;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.liveness.report_healthy().await;
                    previous = self.tick(previous).await;
                }
            }
        }
        info!("snapshot broadcaster stopping");
    }

    async fn tick(&self, previous: Option<Snapshot>) -> Option<Snapshot> {
        let snapshot = match self.capture().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Transient read failure: keep the previous snapshot so we
                // do not re-broadcast unchanged state once the store is back.
                metrics::counter!("leaderboard_broadcast_errors_total").increment(1);
                warn!("skipping broadcast tick: {}", e);
                return previous;
            }
        };

        if previous.as_ref() == Some(&snapshot) {
            metrics::counter!("leaderboard_broadcast_suppressed_total").increment(1);
            return previous;
        }

        metrics::counter!("leaderboard_broadcast_emitted_total").increment(1);
        let update = SnapshotUpdate {
            updated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            snapshot: snapshot.clone(),
        };
        // No receivers is fine; observers come and go.
        drop(self.sender.send(update));
        Some(snapshot)
    }

    async fn capture(&self) -> Result<Snapshot, crate::error::QueryError> {
        Ok(Snapshot {
            leaderboard: self.query.leaderboard(SNAPSHOT_TOP_N).await?,
            recent_achievements: self.query.recent_achievements(SNAPSHOT_FEED_LIMIT).await?,
        })
    }
}

/// Optional console observer of the push feed: logs each emitted
/// leaderboard, the debugging affordance the service grew up with.
pub fn spawn_console_observer(mut receiver: broadcast::Receiver<SnapshotUpdate>) {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(update) => {
                    for entry in &update.snapshot.leaderboard.entries {
                        info!(
                            "leaderboard #{} {}: {} pts",
                            entry.rank, entry.player_name, entry.score
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
