//! Event-to-state aggregation pipeline for a real-time gaming
//! leaderboard: consumes an at-least-once stream of gameplay events,
//! applies each exactly once in effect, and serves the resulting ranking
//! state for low-latency reads and a change-driven push feed.

pub mod applier;
pub mod broadcaster;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod prometheus;
pub mod query;
pub mod redis;
pub mod router;
pub mod server;
pub mod stores;
