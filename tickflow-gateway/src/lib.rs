#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Tickflow-Gateway
//! Upstream exchange gateway for the Tickflow pipeline.
//!
//! Owns at most one WebSocket connection per stream key (the singleton miniTicker feed,
//! plus one aggTrade feed per symbol), keeps those connections alive across upstream
//! flakes and scheduled rotations, and fans every raw frame out to any number of
//! downstream subscribers over its own streaming server.

use thiserror::Error;

/// Upstream connector owning exactly one exchange WebSocket connection.
pub mod connector;

/// Registry of upstream connectors keyed by [`registry::StreamKey`].
pub mod registry;

/// Downstream streaming server fanning raw frames out to connected clients.
pub mod server;

/// Environment-driven gateway configuration.
pub mod config;

/// All [`Error`](std::error::Error)s generated in Tickflow-Gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind gateway listener: {0}")]
    Bind(std::io::Error),
}
