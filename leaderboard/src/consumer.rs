use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};
use tracing::{debug, error, info, warn};

use crate::applier::{EventApplier, Outcome};
use crate::config::Config;
use crate::event::RawGameEvent;

// Pause before re-reading after a transport or store failure; recovery is
// replay from the last stored offset, nothing fancier.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Received empty payload")]
    Empty,
}

/// Position of one consumed record within its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOffset {
    pub partition: i32,
    pub offset: i64,
}

/// The transport operations the processing loop drives: fetching decoded
/// records and moving the checkpoint cursor. The loop never touches the
/// broker directly, so the gate/apply/checkpoint ordering can be
/// exercised against a fake.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Collect up to `max` records, returning early on error so the loop
    /// can react, or whatever arrived when `timeout` elapses.
    async fn recv_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Vec<Result<(RawGameEvent, RecordOffset), RecvErr>>;

    /// Mark a record's effect durable: its offset becomes eligible for the
    /// next interval commit. Never called speculatively.
    fn store_position(&self, at: RecordOffset);

    /// Reposition a partition so the record at `at` is fetched again.
    fn rewind_to(&self, at: RecordOffset);

    /// Synchronously commit all stored offsets. Called at shutdown so the
    /// checkpoint reflects everything applied in the final batch.
    fn commit_stored(&self);
}

/// Consumer-group subscriber for the game events topic.
///
/// Offsets are never stored automatically: the loop stores each record's
/// offset only after its event has been durably applied (or ruled out),
/// and the stored positions are committed on an interval and at shutdown.
/// A crash therefore replays from the last committed checkpoint, and the
/// dedup gate absorbs whatever that replay redelivers.
#[derive(Clone)]
pub struct EventConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

impl EventConsumer {
    pub fn new(config: &Config) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set("auto.offset.reset", &config.kafka_offset_reset)
            .set("statistics.interval.ms", "10000")
            // The loop stores offsets itself, after durable application.
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                config.kafka_auto_commit_interval_ms.to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[config.kafka_topic.as_str()])?;

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: config.kafka_topic.clone(),
            }),
        })
    }

    /// Receive and decode one record. Undecodable payloads are poison
    /// pills: their offset is stored immediately, since replay cannot fix
    /// them, and the error is surfaced for counting.
    pub async fn recv(&self) -> Result<(RawGameEvent, RecordOffset), RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let at = RecordOffset {
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            self.store_position(at);
            return Err(RecvErr::Empty);
        };

        match serde_json::from_slice(payload) {
            Ok(raw) => Ok((raw, at)),
            Err(e) => {
                self.store_position(at);
                Err(RecvErr::Serde(e))
            }
        }
    }
}

#[async_trait]
impl Transport for EventConsumer {
    async fn recv_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Vec<Result<(RawGameEvent, RecordOffset), RecvErr>> {
        let mut results = Vec::with_capacity(max);

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {},
            _ = async {
                while results.len() < max {
                    let result = self.recv().await;
                    let was_err = result.is_err();
                    results.push(result);
                    if was_err {
                        break;
                    }
                }
            } => {}
        }

        results
    }

    fn store_position(&self, at: RecordOffset) {
        if let Err(e) = self
            .inner
            .consumer
            .store_offset(&self.inner.topic, at.partition, at.offset)
        {
            // Worst case the record is reprocessed; the gate absorbs it.
            error!("failed to store offset {:?}: {}", at, e);
        }
    }

    fn rewind_to(&self, at: RecordOffset) {
        if let Err(e) = self.inner.consumer.seek(
            &self.inner.topic,
            at.partition,
            rdkafka::Offset::Offset(at.offset),
            Duration::from_secs(5),
        ) {
            error!("failed to rewind partition {:?}: {}", at, e);
        }
    }

    fn commit_stored(&self) {
        if let Err(e) = self.inner.consumer.commit_consumer_state(CommitMode::Sync) {
            // NoOffset just means nothing was consumed since the last commit.
            debug!("offset commit at shutdown: {}", e);
        }
    }
}

/// The write path: fetch, gate, apply, checkpoint.
pub struct ConsumerLoop<T: Transport> {
    transport: T,
    applier: EventApplier,
    liveness: HealthHandle,
    batch_size: usize,
    poll_timeout: Duration,
}

impl<T: Transport> ConsumerLoop<T> {
    pub fn new(
        transport: T,
        applier: EventApplier,
        liveness: HealthHandle,
        batch_size: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            applier,
            liveness,
            batch_size,
            poll_timeout,
        }
    }

    /// Consume until `shutdown` resolves, then finish the in-flight batch
    /// and commit the stored offsets before returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        info!("consumer loop starting");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                batch = self.transport.recv_batch(self.batch_size, self.poll_timeout) => {
                    self.liveness.report_healthy().await;
                    self.process_batch(batch).await;
                }
            }
        }

        info!("consumer loop stopping, committing stored offsets");
        self.transport.commit_stored();
    }

    async fn process_batch(&self, batch: Vec<Result<(RawGameEvent, RecordOffset), RecvErr>>) {
        let mut records = batch.into_iter();
        while let Some(item) = records.next() {
            let (raw, offset) = match item {
                Ok(pair) => pair,
                Err(RecvErr::Kafka(e)) => {
                    metrics::counter!("leaderboard_transport_errors_total").increment(1);
                    error!("transport error, backing off: {}", e);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    return;
                }
                Err(e @ (RecvErr::Serde(_) | RecvErr::Empty)) => {
                    // Offset already stored on receive: replay cannot fix these.
                    metrics::counter!("leaderboard_events_malformed_total").increment(1);
                    warn!("skipping undecodable record: {}", e);
                    continue;
                }
            };

            let event = match raw.validate() {
                Ok(event) => event,
                Err(e) => {
                    metrics::counter!("leaderboard_events_malformed_total").increment(1);
                    warn!("skipping malformed event: {}", e);
                    self.transport.store_position(offset);
                    continue;
                }
            };

            let start = tokio::time::Instant::now();
            match self.applier.apply(&event).await {
                Ok(Outcome::Applied) => {
                    let labels = [("event_type", event.data.type_name().to_string())];
                    metrics::counter!("leaderboard_events_applied_total", &labels).increment(1);
                    metrics::histogram!("leaderboard_event_apply_duration_seconds")
                        .record(start.elapsed().as_secs_f64());
                    debug!(
                        event_id = %event.event_id,
                        player_id = %event.player_id,
                        event_type = event.data.type_name(),
                        "event applied"
                    );
                    self.transport.store_position(offset);
                }
                Ok(Outcome::Duplicate) => {
                    metrics::counter!("leaderboard_events_duplicate_total").increment(1);
                    debug!(event_id = %event.event_id, "skipping duplicate event");
                    self.transport.store_position(offset);
                }
                Err(e) => {
                    metrics::counter!("leaderboard_store_errors_total").increment(1);
                    error!(event_id = %event.event_id, "store error, will replay: {}", e);
                    self.rewind_abandoned(offset, records);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    return;
                }
            }
        }
    }

    /// Abort handling for a mid-batch store failure. The failed record and
    /// everything fetched after it are abandoned, but their fetch positions
    /// have already advanced; every partition appearing in that remainder
    /// is rolled back to its first unapplied offset so none of those
    /// records can be committed past without being applied.
    fn rewind_abandoned<I>(&self, failed: RecordOffset, rest: I)
    where
        I: Iterator<Item = Result<(RawGameEvent, RecordOffset), RecvErr>>,
    {
        let mut earliest: HashMap<i32, i64> = HashMap::new();
        earliest.insert(failed.partition, failed.offset);
        for item in rest {
            if let Ok((_, at)) = item {
                let first = earliest.entry(at.partition).or_insert(at.offset);
                *first = (*first).min(at.offset);
            }
        }

        for (partition, offset) in earliest {
            self.transport.rewind_to(RecordOffset { partition, offset });
        }
    }
}
