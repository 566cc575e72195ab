use crate::client::GatewayClient;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::{collections::HashMap, sync::Arc};
use tickflow_integration::{channel::BoundedTx, model::Symbol};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

/// Source of per-symbol raw aggTrade streams.
///
/// The production implementation opens a gateway stream; tests substitute scripted
/// frames.
pub trait TradeStreamSource: Send + Sync + 'static {
    /// Forward the symbol's raw frames into `out` until the token cancels.
    fn open(
        &self,
        token: CancellationToken,
        symbol: Symbol,
        out: BoundedTx<Bytes>,
    ) -> BoxFuture<'static, ()>;
}

impl std::fmt::Debug for dyn TradeStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TradeStreamSource")
    }
}

impl TradeStreamSource for GatewayClient {
    fn open(
        &self,
        token: CancellationToken,
        symbol: Symbol,
        out: BoundedTx<Bytes>,
    ) -> BoxFuture<'static, ()> {
        let client = self.clone();
        Box::pin(async move { client.stream_agg_trade(token, symbol, out).await })
    }
}

/// Outcome of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The user is newly following the symbol.
    Started,
    /// The same user re-subscribing is an idempotent success.
    AlreadySubscribed,
}

#[derive(Debug)]
struct StreamHandle {
    cancel: CancellationToken,
    generation: u64,
}

#[derive(Debug, Default)]
struct Registry {
    streams: HashMap<Symbol, StreamHandle>,
    followers: HashMap<Symbol, Vec<u64>>,
    next_generation: u64,
}

/// Owns the set of followers per symbol and the lifecycle of each symbol's upstream
/// stream task.
///
/// Invariant: a symbol has a live stream task iff its follower list is non-empty, up to
/// the tolerated window between teardown and the next subscription that restarts it.
#[derive(Debug)]
pub struct StreamManager {
    registry: Arc<parking_lot::RwLock<Registry>>,
    source: Arc<dyn TradeStreamSource>,
    raw_tx: BoundedTx<Bytes>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl StreamManager {
    pub fn new(
        source: Arc<dyn TradeStreamSource>,
        raw_tx: BoundedTx<Bytes>,
        token: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            registry: Arc::new(parking_lot::RwLock::new(Registry::default())),
            source,
            raw_tx,
            token,
            tracker,
        }
    }

    /// Subscribe the user to the symbol, starting its stream task on first use.
    pub fn add_coin(&self, symbol: Symbol, user_id: u64) -> AddOutcome {
        let mut guard = self.registry.write();
        let registry = &mut *guard;

        let followers = registry.followers.entry(symbol.clone()).or_default();
        let outcome = if followers.contains(&user_id) {
            info!(%symbol, user_id, "user already subscribed");
            AddOutcome::AlreadySubscribed
        } else {
            followers.push(user_id);
            AddOutcome::Started
        };

        let stream_active = registry
            .streams
            .get(&symbol)
            .is_some_and(|handle| !handle.cancel.is_cancelled());
        if !stream_active {
            self.start_stream(registry, symbol);
        }

        outcome
    }

    /// Remove the user's subscription; the last follower leaving cancels the stream.
    ///
    /// The stream task's own cleanup removes the registry entries, so a new subscriber
    /// racing the teardown simply restarts the stream.
    pub fn delete_coin(&self, symbol: &Symbol, user_id: u64) {
        let mut guard = self.registry.write();
        let registry = &mut *guard;

        let Some(followers) = registry.followers.get_mut(symbol) else {
            return;
        };
        if let Some(position) = followers.iter().position(|id| *id == user_id) {
            followers.remove(position);
            info!(%symbol, user_id, "user unsubscribed");
        }

        if followers.is_empty() {
            if let Some(handle) = registry.streams.get(symbol) {
                info!(%symbol, "last follower removed, stopping stream");
                handle.cancel.cancel();
            }
        }
    }

    /// Snapshot of the symbol's followers.
    pub fn followers(&self, symbol: &Symbol) -> Vec<u64> {
        self.registry
            .read()
            .followers
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// `true` while a live stream task is registered for the symbol.
    pub fn stream_active(&self, symbol: &Symbol) -> bool {
        self.registry.read().streams.contains_key(symbol)
    }

    fn start_stream(&self, registry: &mut Registry, symbol: Symbol) {
        let cancel = self.token.child_token();
        registry.next_generation += 1;
        let generation = registry.next_generation;

        registry.streams.insert(
            symbol.clone(),
            StreamHandle {
                cancel: cancel.clone(),
                generation,
            },
        );

        info!(%symbol, "starting aggTrade stream");
        let stream = self
            .source
            .open(cancel, symbol.clone(), self.raw_tx.clone());
        let shared = Arc::clone(&self.registry);

        self.tracker.spawn(async move {
            stream.await;

            let mut registry = shared.write();
            // A newer generation may already have replaced this stream's entry.
            if registry
                .streams
                .get(&symbol)
                .is_some_and(|handle| handle.generation == generation)
            {
                registry.streams.remove(&symbol);
            }
            if registry.followers.get(&symbol).is_some_and(Vec::is_empty) {
                registry.followers.remove(&symbol);
            }

            debug!(%symbol, "aggTrade stream finished");
        });
    }
}

/// Read-only follower lookup used by the fanout publisher.
pub trait FollowerLookup: Send + Sync {
    fn followers(&self, symbol: &Symbol) -> Vec<u64>;
}

impl FollowerLookup for StreamManager {
    fn followers(&self, symbol: &Symbol) -> Vec<u64> {
        StreamManager::followers(self, symbol)
    }
}
