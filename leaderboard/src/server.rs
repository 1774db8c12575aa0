use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

use crate::applier::EventApplier;
use crate::broadcaster::{spawn_console_observer, SnapshotBroadcaster};
use crate::config::Config;
use crate::consumer::{ConsumerLoop, EventConsumer};
use crate::query::QueryService;
use crate::redis::{Client, RedisClient};
use crate::router;
use crate::stores::dedup::DedupLedger;

async fn stopped(mut rx: watch::Receiver<()>) {
    _ = rx.changed().await;
}

/// Wire the pipeline and serve until `shutdown` resolves: the HTTP
/// listener drains first, then the consumer loop finishes its in-flight
/// batch and commits its checkpoint, then the broadcaster stops.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");

    let client: Arc<dyn Client + Send + Sync> = Arc::new(
        RedisClient::new(config.redis_url.clone()).expect("failed to create redis client"),
    );

    let ledger = DedupLedger::new(client.clone(), config.dedup_retention_secs);
    let applier = EventApplier::new(client.clone(), ledger);
    let query = QueryService::new(client);

    let consumer = EventConsumer::new(&config).expect("failed to create kafka consumer");
    let consumer_liveness = liveness
        .register("consumer".to_string(), time::Duration::seconds(30))
        .await;
    let consumer_loop = ConsumerLoop::new(
        consumer,
        applier,
        consumer_liveness,
        config.consumer_batch_size,
        Duration::from_millis(config.consumer_poll_timeout_ms),
    );

    let (updates, _) = SnapshotBroadcaster::channel();
    let broadcaster_liveness = liveness
        .register("broadcaster".to_string(), time::Duration::seconds(30))
        .await;
    let broadcaster = SnapshotBroadcaster::new(
        query.clone(),
        Duration::from_millis(config.broadcast_interval_ms),
        updates.clone(),
        broadcaster_liveness,
    );

    if config.log_leaderboard {
        spawn_console_observer(updates.subscribe());
    }

    let (stop, stop_rx) = watch::channel(());
    let consumer_task = tokio::spawn(consumer_loop.run(stopped(stop_rx.clone())));
    let broadcaster_task = tokio::spawn(broadcaster.run(stopped(stop_rx)));

    let app = router::router(query, updates, liveness, config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("failed to serve http");

    _ = stop.send(());
    if let Err(e) = consumer_task.await {
        error!("consumer task panicked: {}", e);
    }
    if let Err(e) = broadcaster_task.await {
        error!("broadcaster task panicked: {}", e);
    }
}
