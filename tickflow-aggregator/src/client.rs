use crate::config::SocketServiceConfig;
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tickflow_integration::{
    channel::BoundedTx,
    model::Symbol,
    protocol::websocket::{self, WebSocket, WsMessage},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// WebSocket client consuming the gateway's raw streams.
///
/// The gateway never retries a broken client stream; it is the client's job to
/// reconnect, which this type does with a bounded linear-backoff dial loop around every
/// stream session.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    addr: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl GatewayClient {
    pub fn new(config: &SocketServiceConfig) -> Self {
        Self {
            addr: config.addr.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        }
    }

    fn mini_ticker_url(&self) -> String {
        format!("ws://{}/stream/miniticker", self.addr)
    }

    fn agg_trade_url(&self, symbol: &Symbol) -> String {
        format!("ws://{}/stream/aggtrade/{symbol}", self.addr)
    }

    /// Consume the singleton miniTicker stream, forwarding raw frames into `out`.
    pub async fn stream_mini_ticker(&self, token: CancellationToken, out: BoundedTx<Bytes>) {
        self.stream(token, self.mini_ticker_url(), out).await
    }

    /// Consume the symbol's aggTrade stream, forwarding raw frames into `out`.
    pub async fn stream_agg_trade(
        &self,
        token: CancellationToken,
        symbol: Symbol,
        out: BoundedTx<Bytes>,
    ) {
        self.stream(token, self.agg_trade_url(&symbol), out).await
    }

    async fn stream(&self, token: CancellationToken, url: String, out: BoundedTx<Bytes>) {
        while !token.is_cancelled() {
            let Some(websocket) = self.connect_with_retry(&token, &url).await else {
                return;
            };

            info!(url, "starting to receive raw frames from gateway");
            if !receive_frames(&token, websocket, &out).await {
                return;
            }
        }
    }

    /// Dial the gateway with bounded linear backoff: attempt `i` waits `(i + 1)` times
    /// the configured delay after failing.
    async fn connect_with_retry(
        &self,
        token: &CancellationToken,
        url: &str,
    ) -> Option<WebSocket> {
        for attempt in 0..self.max_retries {
            if token.is_cancelled() {
                info!("connection cancelled by token");
                return None;
            }

            let dialled = tokio::select! {
                _ = token.cancelled() => {
                    info!("connection cancelled by token");
                    return None;
                }
                dialled = websocket::connect(url) => dialled,
            };
            match dialled {
                Ok(websocket) => return Some(websocket),
                Err(dial_error) => {
                    let delay = self.retry_delay * (attempt + 1);
                    warn!(
                        attempt = attempt + 1,
                        ?delay,
                        %dial_error,
                        "failed to connect to gateway, retrying"
                    );

                    tokio::select! {
                        _ = token.cancelled() => {
                            info!("connection cancelled during retry delay");
                            return None;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        error!(addr = %self.addr, url, "failed to connect to gateway after all retries");
        None
    }
}

/// Pump frames from one stream session into `out`.
///
/// Returns `true` when the session ended in a way worth redialling (server dropped the
/// stream), `false` when the pipeline itself is done (cancelled, or `out` closed).
async fn receive_frames(
    token: &CancellationToken,
    mut websocket: WebSocket,
    out: &BoundedTx<Bytes>,
) -> bool {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping to receive frames from gateway");
                return false;
            }
            message = websocket.next() => match message {
                Some(Ok(WsMessage::Close(close_frame))) => {
                    info!(?close_frame, "stream closed by gateway");
                    return true;
                }
                Some(Ok(message)) => {
                    let Some(payload) = websocket::payload_bytes(message) else {
                        continue;
                    };

                    tokio::select! {
                        _ = token.cancelled() => return false,
                        sent = out.send(payload) => if sent.is_err() {
                            debug!("raw frame queue closed, stopping gateway client");
                            return false;
                        }
                    }
                }
                Some(Err(read_error)) => {
                    warn!(%read_error, "error receiving frame from gateway");
                    return true;
                }
                None => {
                    info!("stream ended by gateway");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_urls() {
        let client = GatewayClient::new(&SocketServiceConfig {
            addr: "socket-service:50051".to_string(),
            max_retries: 10,
            retry_delay: Duration::from_secs(1),
        });

        assert_eq!(
            client.mini_ticker_url(),
            "ws://socket-service:50051/stream/miniticker"
        );
        assert_eq!(
            client.agg_trade_url(&Symbol::new("BTCUSDT")),
            "ws://socket-service:50051/stream/aggtrade/btcusdt"
        );
    }
}
