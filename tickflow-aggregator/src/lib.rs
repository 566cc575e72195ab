#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Tickflow-Aggregator
//! Aggregation service of the Tickflow pipeline.
//!
//! Consumes the gateway's raw streams, dispatches frames by shape into the aggTrade and
//! miniTicker lanes, reduces them into per-second price samples and enriched daily
//! statistics, and delivers the results to subscribers (Redis pub/sub) and the archive
//! (Kafka). Subscriptions are driven by a small HTTP control plane.

use thiserror::Error;

/// WebSocket client consuming the gateway's raw streams.
pub mod client;

/// Subscriber registry and per-symbol stream lifecycle.
pub mod stream_manager;

/// Raw frame dispatcher classifying frames into the two parsing lanes.
pub mod dispatch;

/// Per-second aggregator holding the latest price per symbol.
pub mod second;

/// Daily statistic parser and enricher.
pub mod daily;

/// Batched Kafka producer.
pub mod kafka;

/// Fanout publisher delivering per-subscriber samples over Redis.
pub mod publisher;

/// HTTP control plane for subscribe/unsubscribe.
pub mod http;

/// Environment-driven aggregator configuration.
pub mod config;

/// All [`Error`](std::error::Error)s generated in Tickflow-Aggregator.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("failed to bind control plane listener: {0}")]
    Bind(std::io::Error),

    #[error("control plane server error: {0}")]
    Serve(std::io::Error),

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
