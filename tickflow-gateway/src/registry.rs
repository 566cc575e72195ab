use crate::{config::GatewayConfig, connector::UpstreamConnector};
use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};
use tickflow_integration::model::Symbol;
use tokio::sync::broadcast;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

/// Capacity of each connector's broadcast output queue.
pub const OUTPUT_CAPACITY: usize = 100;

/// Identifier deduplicating upstream connections: the singleton miniTicker feed, or one
/// aggTrade feed per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    MiniTicker,
    AggTrade(Symbol),
}

impl Display for StreamKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKey::MiniTicker => write!(f, "miniTicker"),
            StreamKey::AggTrade(symbol) => write!(f, "{symbol}"),
        }
    }
}

/// Registry of upstream connectors keyed by [`StreamKey`].
///
/// At most one upstream connection exists per key at any instant: lookup-and-insert is
/// atomic under a single lock, and every subscriber of the same key observes the same
/// broadcast channel.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: parking_lot::Mutex<HashMap<StreamKey, broadcast::Sender<Bytes>>>,
    config: GatewayConfig,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionRegistry {
    pub fn new(config: GatewayConfig, token: CancellationToken, tracker: TaskTracker) -> Self {
        Self {
            connections: parking_lot::Mutex::new(HashMap::new()),
            config,
            token,
            tracker,
        }
    }

    /// Subscribe to the singleton miniTicker feed, creating its connector on first use.
    pub fn subscribe_mini_ticker(&self) -> broadcast::Receiver<Bytes> {
        self.subscribe(StreamKey::MiniTicker)
    }

    /// Subscribe to the symbol's aggTrade feed, creating its connector on first use.
    pub fn subscribe_agg_trade(&self, symbol: Symbol) -> broadcast::Receiver<Bytes> {
        self.subscribe(StreamKey::AggTrade(symbol))
    }

    fn subscribe(&self, key: StreamKey) -> broadcast::Receiver<Bytes> {
        let mut connections = self.connections.lock();

        if let Some(output) = connections.get(&key) {
            debug!(%key, "reusing existing upstream connection");
            return output.subscribe();
        }

        info!(%key, "creating new upstream connection");
        let (output, rx) = broadcast::channel(OUTPUT_CAPACITY);
        let connector = UpstreamConnector::new(self.config.stream_url(&key), output.clone());

        self.tracker.spawn(connector.run(self.token.clone()));
        connections.insert(key, output);

        rx
    }

    /// Number of live registry entries. Connectors themselves stop via the main token.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn close_all(&self) {
        info!(count = self.connection_count(), "closing all upstream connections");
    }
}
