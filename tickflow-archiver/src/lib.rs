#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Tickflow-Archiver
//! Archive service of the Tickflow pipeline.
//!
//! Consumes enriched daily ticker statistics off the messaging layer and batches them
//! into a ClickHouse table partitioned by month, with at-least-once delivery: a failed
//! insert retains the batch so the next flush retries the same rows.

use thiserror::Error;

/// Kafka consumer feeding the batch writer.
pub mod consumer;

/// Batched ClickHouse writer.
pub mod repository;

/// Environment-driven archiver configuration.
pub mod config;

/// All [`Error`](std::error::Error)s generated in Tickflow-Archiver.
#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("clickhouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),
}
