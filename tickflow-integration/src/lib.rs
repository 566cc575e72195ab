#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity)]

//! # Tickflow-Integration
//! Shared plumbing for the Tickflow market data pipeline.
//!
//! Utilised by the `tickflow-gateway`, `tickflow-aggregator` and `tickflow-archiver`
//! binaries to speak the same wire models over the same transport primitives. It provides:
//! * **Channels**: bounded channel wrappers used for every pipeline queue.
//! * **Protocol**: WebSocket connect & frame helpers shared by the upstream connector and
//!   the gateway client.
//! * **Backoff**: the jittered exponential reconnection policy.
//! * **Models**: exchange wire types and the records derived from them.

/// All [`Error`](std::error::Error)s generated in Tickflow-Integration.
pub mod error;

/// Bounded channel wrappers used for every queue in the pipeline.
///
/// eg/ `BoundedTx`, `BoundedRx`, etc.
pub mod channel;

/// WebSocket protocol helpers shared by upstream connectors and downstream clients.
pub mod protocol;

/// Jittered exponential backoff policy for reconnecting transports.
pub mod backoff;

/// Exchange wire models and the pipeline records derived from them.
pub mod model;

/// Typed environment variable getters used by every binary's configuration loader.
pub mod env;
