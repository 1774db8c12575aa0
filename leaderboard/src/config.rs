use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:8000")]
    pub address: SocketAddr,

    pub redis_url: String,

    pub kafka_hosts: String,
    #[envconfig(default = "game-events")]
    pub kafka_topic: String,
    #[envconfig(default = "leaderboard-processor")]
    pub kafka_consumer_group: String,
    /// Where to start on a fresh consumer group: "earliest" replays the
    /// whole retained stream, "latest" skips history.
    #[envconfig(default = "earliest")]
    pub kafka_offset_reset: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
    #[envconfig(default = "5000")]
    pub kafka_auto_commit_interval_ms: u32,

    #[envconfig(default = "100")]
    pub consumer_batch_size: usize,
    #[envconfig(default = "1000")]
    pub consumer_poll_timeout_ms: u64,

    /// Push feed cadence; bursty event arrival collapses to at most one
    /// emission per interval.
    #[envconfig(default = "1000")]
    pub broadcast_interval_ms: u64,

    /// How long applied event ids are retained for deduplication. Should
    /// cover the transport's own retention window.
    #[envconfig(default = "86400")]
    pub dedup_retention_secs: u64,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    /// Log each emitted leaderboard snapshot to the console.
    #[envconfig(default = "false")]
    pub log_leaderboard: bool,
}
