use std::convert::Infallible;
use std::future::ready;

use axum::extract::{Path, Query, State as AxumState};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use health::HealthRegistry;
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::broadcaster::SnapshotUpdate;
use crate::error::QueryError;
use crate::event::AchievementRecord;
use crate::prometheus::{setup_metrics_recorder, track_metrics};
use crate::query::{LeaderboardView, PlayerSummary, QueryService};

#[derive(Clone)]
pub struct State {
    pub query: QueryService,
    pub updates: broadcast::Sender<SnapshotUpdate>,
    pub liveness: HealthRegistry,
}

async fn index() -> &'static str {
    "leaderboard"
}

#[derive(Deserialize, Default)]
struct LeaderboardParams {
    top: Option<usize>,
}

#[derive(Deserialize, Default)]
struct AchievementParams {
    limit: Option<usize>,
}

async fn get_leaderboard(
    AxumState(state): AxumState<State>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardView>, QueryError> {
    let view = state.query.leaderboard(params.top.unwrap_or(10)).await?;
    Ok(Json(view))
}

async fn get_player(
    AxumState(state): AxumState<State>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerSummary>, QueryError> {
    let summary = state.query.player(&player_id).await?;
    Ok(Json(summary))
}

async fn get_achievements(
    AxumState(state): AxumState<State>,
    Query(params): Query<AchievementParams>,
) -> Result<Json<Vec<AchievementRecord>>, QueryError> {
    let records = state
        .query
        .recent_achievements(params.limit.unwrap_or(10))
        .await?;
    Ok(Json(records))
}

/// Push feed over SSE: one `leaderboard_update` event per changed
/// snapshot. Subscribers joining mid-stream get the next periodic
/// emission; lagging subscribers skip to the freshest update.
async fn subscribe_updates(
    AxumState(state): AxumState<State>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.updates.subscribe();
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(update) => match Event::default().event("leaderboard_update").json_data(&update)
                {
                    Ok(event) => return Some((Ok(event), receiver)),
                    Err(e) => {
                        warn!("failed to encode snapshot update: {}", e);
                        continue;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router(
    query: QueryService,
    updates: broadcast::Sender<SnapshotUpdate>,
    liveness: HealthRegistry,
    metrics: bool,
) -> Router {
    let state = State {
        query,
        updates,
        liveness: liveness.clone(),
    };

    let status_registry = liveness;
    let router = Router::new()
        .route("/", get(index))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/player/:player_id", get(get_player))
        .route("/api/achievements", get(get_achievements))
        .route("/api/updates", get(subscribe_updates))
        .route(
            "/_liveness",
            get(move || ready(status_registry.get_status())),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to: installing a global recorder
    // when the crate is used as a library (during tests etc) does not work
    // well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
