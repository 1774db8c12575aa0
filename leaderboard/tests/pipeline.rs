//! End-to-end properties of the aggregation pipeline, driven through the
//! same gate/apply path the Kafka loop uses, against the in-memory store.

use std::sync::Arc;

use leaderboard::applier::{EventApplier, Outcome};
use leaderboard::event::RawGameEvent;
use leaderboard::query::QueryService;
use leaderboard::redis::{Client, MockRedisClient};
use leaderboard::stores::dedup::DedupLedger;

struct Pipeline {
    applier: EventApplier,
    query: QueryService,
}

fn pipeline() -> Pipeline {
    let client: Arc<dyn Client + Send + Sync> = Arc::new(MockRedisClient::new());
    let ledger = DedupLedger::new(client.clone(), 86400);
    Pipeline {
        applier: EventApplier::new(client.clone(), ledger),
        query: QueryService::new(client),
    }
}

fn scored(event_id: &str, player_id: &str, name: &str, points: i64) -> RawGameEvent {
    RawGameEvent {
        event_id: Some(event_id.to_string()),
        event_type: Some("player_scored".to_string()),
        timestamp: Some("2024-03-01T12:00:00Z".to_string()),
        player_id: Some(player_id.to_string()),
        player_name: Some(name.to_string()),
        points: Some(points),
        action: Some("kill".to_string()),
        ..Default::default()
    }
}

fn achievement(event_id: &str, player_id: &str, name: &str) -> RawGameEvent {
    RawGameEvent {
        event_id: Some(event_id.to_string()),
        event_type: Some("achievement_unlocked".to_string()),
        timestamp: Some("2024-03-01T12:00:00Z".to_string()),
        player_id: Some(player_id.to_string()),
        player_name: Some(player_id.to_string()),
        achievement_name: Some(name.to_string()),
        achievement_rarity: Some("rare".to_string()),
        ..Default::default()
    }
}

async fn apply(pipeline: &Pipeline, raw: RawGameEvent) -> Outcome {
    let event = raw.validate().expect("valid event");
    pipeline.applier.apply(&event).await.expect("store up")
}

#[tokio::test]
async fn scoring_scenario_and_redelivery() {
    let p = pipeline();

    for (id, points) in [("e1", 100), ("e2", 50), ("e3", 25)] {
        let outcome = apply(&p, scored(id, "player_001", "NightHawk", points)).await;
        assert_eq!(outcome, Outcome::Applied);
    }

    let summary = p.query.player("player_001").await.unwrap();
    assert_eq!(summary.profile.total_score, 175);
    assert_eq!(summary.profile.events_count, 3);

    // Redelivering e2 is absorbed by the gate and changes nothing.
    let outcome = apply(&p, scored("e2", "player_001", "NightHawk", 50)).await;
    assert_eq!(outcome, Outcome::Duplicate);
    let summary = p.query.player("player_001").await.unwrap();
    assert_eq!(summary.profile.total_score, 175);
    assert_eq!(summary.profile.events_count, 3);
}

#[tokio::test]
async fn top_k_scenario() {
    let p = pipeline();
    apply(&p, scored("a1", "player_a", "Alpha", 300)).await;
    apply(&p, scored("b1", "player_b", "Bravo", 200)).await;
    apply(&p, scored("c1", "player_c", "Charlie", 100)).await;

    let view = p.query.leaderboard(2).await.unwrap();
    assert_eq!(view.total_players, 3);
    assert_eq!(view.entries.len(), 2);
    assert_eq!(
        (view.entries[0].player_id.as_str(), view.entries[0].score),
        ("player_a", 300)
    );
    assert_eq!(
        (view.entries[1].player_id.as_str(), view.entries[1].score),
        ("player_b", 200)
    );
    assert_eq!(view.entries[0].rank, 1);
    assert_eq!(view.entries[0].player_name, "Alpha");
}

#[tokio::test]
async fn cross_player_interleaving_is_order_independent() {
    let events = vec![
        scored("a1", "player_a", "Alpha", 100),
        scored("b1", "player_b", "Bravo", 40),
        scored("a2", "player_a", "Alpha", 60),
        scored("b2", "player_b", "Bravo", 250),
        scored("a3", "player_a", "Alpha", 10),
    ];

    let forward = pipeline();
    for raw in events.clone() {
        apply(&forward, raw).await;
    }

    let reversed = pipeline();
    for raw in events.into_iter().rev() {
        apply(&reversed, raw).await;
    }

    for player in ["player_a", "player_b"] {
        let a = forward.query.player(player).await.unwrap();
        let b = reversed.query.player(player).await.unwrap();
        assert_eq!(a.profile, b.profile, "profiles diverge for {player}");
        assert_eq!(a.rank, b.rank, "ranks diverge for {player}");
    }
}

#[tokio::test]
async fn rank_only_improves_with_own_scoring() {
    let p = pipeline();
    apply(&p, scored("x1", "player_x", "Xi", 100)).await;
    apply(&p, scored("y1", "player_y", "Yo", 50)).await;

    let before = p.query.player("player_y").await.unwrap().rank.unwrap();

    // Others scoring can only push player_y down, never up.
    apply(&p, scored("x2", "player_x", "Xi", 100)).await;
    apply(&p, scored("z1", "player_z", "Zed", 75)).await;
    let after = p.query.player("player_y").await.unwrap().rank.unwrap();
    assert!(after >= before);

    // Their own score moving past the field improves their rank.
    apply(&p, scored("y2", "player_y", "Yo", 500)).await;
    let topped = p.query.player("player_y").await.unwrap().rank.unwrap();
    assert_eq!(topped, 1);
}

#[tokio::test]
async fn interrupted_application_replays_to_single_effect() {
    let mock = MockRedisClient::new();
    let client: Arc<dyn Client + Send + Sync> = Arc::new(mock.clone());
    let ledger = DedupLedger::new(client.clone(), 86400);
    let applier = EventApplier::new(client.clone(), ledger);
    let query = QueryService::new(client);

    // The store dies mid-processing: mutation and mark commit together,
    // so neither lands and the checkpoint stays put.
    mock.set_unavailable(true);
    let event = scored("e1", "player_001", "NightHawk", 100)
        .validate()
        .unwrap();
    assert!(applier.apply(&event).await.is_err());
    mock.set_unavailable(false);

    // Replay from the last checkpoint delivers e1 again; the final state
    // is one clean application.
    assert_eq!(applier.apply(&event).await.unwrap(), Outcome::Applied);
    assert_eq!(applier.apply(&event).await.unwrap(), Outcome::Duplicate);

    let summary = query.player("player_001").await.unwrap();
    assert_eq!(summary.profile.total_score, 100);
    assert_eq!(summary.profile.events_count, 1);
}

#[tokio::test]
async fn achievement_feed_is_bounded_to_newest_100() {
    let p = pipeline();
    for n in 0..130 {
        apply(&p, achievement(&format!("a{n}"), "player_001", &format!("badge-{n}"))).await;
    }

    let records = p.query.recent_achievements(1000).await.unwrap();
    assert_eq!(records.len(), 100);
    assert_eq!(records[0].achievement, "badge-129");
    assert_eq!(records[99].achievement, "badge-30");
}

#[tokio::test]
async fn malformed_events_do_not_mutate_state() {
    let p = pipeline();

    let mut missing_points = scored("m1", "player_001", "NightHawk", 0);
    missing_points.points = None;
    assert!(missing_points.validate().is_err());

    let negative = scored("m2", "player_001", "NightHawk", -5);
    assert!(negative.validate().is_err());

    // Nothing reached the stores.
    assert!(matches!(
        p.query.player("player_001").await,
        Err(leaderboard::error::QueryError::PlayerNotFound)
    ));
}
