use crate::{GatewayError, registry::ConnectionRegistry};
use bytes::Bytes;
use futures::{Sink, Stream};
use futures_util::{SinkExt, StreamExt};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tickflow_integration::{
    model::Symbol,
    protocol::websocket::{WsError, WsMessage},
};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

/// Minimum interval between slow-client drop warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Stream selected by a downstream client's upgrade request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRoute {
    MiniTicker,
    AggTrade(Symbol),
}

/// Resolve the stream a client is asking for from its request path.
pub fn parse_route(path: &str) -> Option<StreamRoute> {
    match path.trim_end_matches('/') {
        "/stream/miniticker" => Some(StreamRoute::MiniTicker),
        path => {
            let symbol = path.strip_prefix("/stream/aggtrade/")?;
            if symbol.is_empty() || symbol.contains('/') {
                return None;
            }
            Some(StreamRoute::AggTrade(Symbol::new(symbol)))
        }
    }
}

/// Per-client forwarding counters with rate-limited drop warnings.
#[derive(Debug)]
pub struct ForwardStats {
    received: u64,
    dropped: u64,
    last_warning: Option<Instant>,
}

impl ForwardStats {
    pub fn new() -> Self {
        Self {
            received: 0,
            dropped: 0,
            last_warning: None,
        }
    }

    pub fn record_forwarded(&mut self) {
        self.received += 1;
    }

    /// Record `count` dropped frames; returns `true` when a warning should be emitted
    /// now (at most one per [`WARN_INTERVAL`]).
    pub fn record_dropped(&mut self, count: u64) -> bool {
        self.dropped += count;

        match self.last_warning {
            Some(at) if at.elapsed() < WARN_INTERVAL => false,
            _ => {
                self.last_warning = Some(Instant::now());
                true
            }
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn drop_rate_percent(&self) -> f64 {
        let total = self.received + self.dropped;
        if total == 0 {
            return 0.0;
        }
        self.dropped as f64 / total as f64 * 100.0
    }
}

impl Default for ForwardStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the downstream streaming server until the token cancels.
///
/// A bind failure is a startup failure and is returned to the caller.
pub async fn run(
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    addr: String,
    tracker: TaskTracker,
) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(GatewayError::Bind)?;
    info!(addr, "gateway listening");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping gateway server");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracker.spawn(serve_client(
                        token.clone(),
                        Arc::clone(&registry),
                        stream,
                        peer,
                    ));
                }
                Err(accept_error) => warn!(%accept_error, "could not accept client connection"),
            }
        }
    }
}

async fn serve_client(
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    let mut route = None;
    let callback = |request: &Request, response: Response| {
        route = parse_route(request.uri().path());
        if route.is_some() {
            Ok(response)
        } else {
            let mut not_found = ErrorResponse::new(None);
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };

    let websocket = match accept_hdr_async(stream, callback).await {
        Ok(websocket) => websocket,
        Err(handshake_error) => {
            warn!(%peer, %handshake_error, "client handshake failed");
            return;
        }
    };

    let Some(route) = route else {
        return;
    };

    info!(%peer, ?route, "client connected to raw stream");
    let source = match route {
        StreamRoute::MiniTicker => registry.subscribe_mini_ticker(),
        StreamRoute::AggTrade(symbol) => registry.subscribe_agg_trade(symbol),
    };

    let stats = forward(token, source, websocket).await;
    info!(
        %peer,
        received = stats.received(),
        dropped = stats.dropped(),
        "client stream finished"
    );
}

/// Forward every frame from `source` to the connected client.
///
/// Terminates when the client disconnects, the source closes, or the token cancels.
/// Frames lost to a lagging client are counted and surfaced with a rate-limited warning.
pub async fn forward<S>(
    token: CancellationToken,
    mut source: broadcast::Receiver<Bytes>,
    mut client: S,
) -> ForwardStats
where
    S: Sink<WsMessage, Error = WsError> + Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut stats = ForwardStats::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("forwarder stopped by cancellation");
                break;
            }
            message = client.next() => match message {
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("client disconnected");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(client_error)) => {
                    warn!(%client_error, "client connection error");
                    break;
                }
            },
            frame = source.recv() => match frame {
                Ok(payload) => {
                    if let Err(send_error) = client.send(WsMessage::Binary(payload)).await {
                        warn!(%send_error, "could not send raw frame to client");
                        break;
                    }
                    stats.record_forwarded();
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    if stats.record_dropped(count) {
                        warn!(
                            received = stats.received(),
                            dropped = stats.dropped(),
                            drop_rate_percent = stats.drop_rate_percent(),
                            "client too slow, dropping frames"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("source channel closed");
                    break;
                }
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_route() {
        assert_eq!(
            parse_route("/stream/miniticker"),
            Some(StreamRoute::MiniTicker)
        );
        assert_eq!(
            parse_route("/stream/aggtrade/BTCUSDT"),
            Some(StreamRoute::AggTrade(Symbol::new("btcusdt")))
        );
        assert_eq!(parse_route("/stream/aggtrade/"), None);
        assert_eq!(parse_route("/stream/aggtrade/x/y"), None);
        assert_eq!(parse_route("/other"), None);
    }

    #[test]
    fn test_forward_stats_accounting() {
        let mut stats = ForwardStats::new();

        for _ in 0..16 {
            stats.record_forwarded();
        }
        assert!(stats.record_dropped(9_984));
        assert!(!stats.record_dropped(0));

        assert_eq!(stats.received() + stats.dropped(), 10_000);
        assert!((stats.drop_rate_percent() - 99.84).abs() < 1e-9);
    }

    #[test]
    fn test_forward_stats_warning_rate_limited() {
        let mut stats = ForwardStats::new();

        assert!(stats.record_dropped(1));
        assert!(!stats.record_dropped(1));
        assert!(!stats.record_dropped(1));

        // Force the previous warning far enough into the past.
        stats.last_warning = Some(Instant::now() - WARN_INTERVAL);
        assert!(stats.record_dropped(1));
    }
}
