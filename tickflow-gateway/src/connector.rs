use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tickflow_integration::{
    backoff::BackoffPolicy,
    protocol::websocket::{self, WsError, WsMessage, WsSink, WsStream},
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exchanges drop connections older than 24 hours, so rotate proactively before that.
const ROTATION_PERIOD: Duration = Duration::from_secs(23 * 60 * 60);

/// Write deadline for answering an upstream ping.
const PONG_DEADLINE: Duration = Duration::from_secs(3);

/// Owns exactly one upstream exchange WebSocket connection and keeps it alive until the
/// provided token cancels.
///
/// Raw frames are fanned out over the broadcast `output`; the sender half is owned by the
/// registry, so channel identity is stable across internal reconnects and outlives the
/// connector task itself.
#[derive(Debug)]
pub struct UpstreamConnector {
    url: String,
    output: broadcast::Sender<Bytes>,
    backoff: BackoffPolicy,
    reconnecting: Arc<parking_lot::Mutex<bool>>,
}

impl UpstreamConnector {
    pub fn new(url: String, output: broadcast::Sender<Bytes>) -> Self {
        Self {
            url,
            output,
            backoff: BackoffPolicy::default(),
            reconnecting: Arc::new(parking_lot::Mutex::new(false)),
        }
    }

    /// Run until the token cancels, or until a reconnection exhausts its attempts.
    ///
    /// The output channel is deliberately not closed on exit - the registry can restart
    /// a connector for the same key without downstream subscribers losing their channel.
    pub async fn run(self, token: CancellationToken) {
        let (error_tx, mut error_rx) = mpsc::channel::<WsError>(1);
        let mut rotation = tokio::time::interval_at(
            tokio::time::Instant::now() + ROTATION_PERIOD,
            ROTATION_PERIOD,
        );

        let socket = match websocket::connect(self.url.as_str()).await {
            Ok(socket) => socket,
            Err(error) => {
                error!(url = %self.url, %error, "could not connect to upstream");
                match self.redial(&token).await {
                    Some(socket) => socket,
                    None => return,
                }
            }
        };
        info!(url = %self.url, "established upstream connection");

        let mut reader = ReaderHandle::spawn(socket, &token, &self.output, &error_tx);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(url = %self.url, "stopping upstream connector");
                    break;
                }
                _ = rotation.tick() => {
                    info!(url = %self.url, "scheduled rotation of upstream connection");
                    match self.recover(&token, reader, &error_tx, &mut error_rx).await {
                        Some(next) => reader = next,
                        None => return,
                    }
                    rotation.reset();
                }
                Some(read_error) = error_rx.recv() => {
                    if *self.reconnecting.lock() {
                        info!(%read_error, "ignoring read error during reconnection");
                        continue;
                    }

                    warn!(url = %self.url, %read_error, "upstream connection broken, reconnecting");
                    match self.recover(&token, reader, &error_tx, &mut error_rx).await {
                        Some(next) => reader = next,
                        None => return,
                    }
                    rotation.reset();
                }
            }
        }

        reader.shutdown().await;
    }

    /// Tear down the old reader and socket, dial a fresh socket, and re-arm the reader.
    async fn recover(
        &self,
        token: &CancellationToken,
        old_reader: ReaderHandle,
        error_tx: &mpsc::Sender<WsError>,
        error_rx: &mut mpsc::Receiver<WsError>,
    ) -> Option<ReaderHandle> {
        *self.reconnecting.lock() = true;

        old_reader.shutdown().await;

        let Some(socket) = self.redial(token).await else {
            *self.reconnecting.lock() = false;
            return None;
        };

        let reader = ReaderHandle::spawn(socket, token, &self.output, error_tx);

        // Discard errors the old reader posted while we were rotating.
        while error_rx.try_recv().is_ok() {}
        *self.reconnecting.lock() = false;

        info!(url = %self.url, "reconnection completed successfully");
        Some(reader)
    }

    /// Dial the upstream with bounded, jittered exponential backoff.
    async fn redial(&self, token: &CancellationToken) -> Option<WebSocketConn> {
        for attempt in 0..self.backoff.max_attempts {
            if token.is_cancelled() {
                info!("cancelled during reconnect");
                return None;
            }

            let dialled = tokio::select! {
                _ = token.cancelled() => {
                    info!("cancelled during reconnect dial");
                    return None;
                }
                dialled = websocket::connect(self.url.as_str()) => dialled,
            };
            match dialled {
                Ok(socket) => {
                    info!(attempt, url = %self.url, "established upstream connection");
                    return Some(socket);
                }
                Err(error) => {
                    warn!(attempt, url = %self.url, %error, "failed reconnect attempt")
                }
            }

            let delay = self.backoff.delay(attempt);
            debug!(attempt, ?delay, "waiting before next reconnect attempt");
            tokio::select! {
                _ = token.cancelled() => {
                    info!("cancelled during reconnect delay");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        error!(
            url = %self.url,
            attempts = self.backoff.max_attempts,
            "could not reconnect to upstream after all retries"
        );
        None
    }
}

type WebSocketConn = websocket::WebSocket;

/// Handle onto the reader task of one live socket.
#[derive(Debug)]
struct ReaderHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
}

impl ReaderHandle {
    fn spawn(
        socket: WebSocketConn,
        parent: &CancellationToken,
        output: &broadcast::Sender<Bytes>,
        error_tx: &mpsc::Sender<WsError>,
    ) -> Self {
        let (sink, stream) = socket.split();
        let sink = Arc::new(tokio::sync::Mutex::new(sink));
        let cancel = parent.child_token();

        let task = tokio::spawn(read_frames(
            cancel.clone(),
            stream,
            Arc::clone(&sink),
            output.clone(),
            error_tx.clone(),
        ));

        Self { cancel, task, sink }
    }

    /// Stop the reader, await it, then close the socket.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(join_error) = self.task.await {
            warn!(%join_error, "upstream reader task panicked");
        }

        let mut sink = self.sink.lock().await;
        if let Err(error) = sink.close().await {
            debug!(%error, "error closing upstream socket");
        }
    }
}

/// Block on incoming frames, forwarding each data frame to the broadcast output.
///
/// Terminates by cancellation, or by posting the encountered read error to `error_tx`
/// (buffered, size 1) and returning.
async fn read_frames(
    cancel: CancellationToken,
    mut stream: WsStream,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    output: broadcast::Sender<Bytes>,
    error_tx: mpsc::Sender<WsError>,
) {
    debug!("upstream reader started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("upstream reader stopped by cancellation");
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Ping(payload))) => send_pong(&sink, payload).await,
                Some(Ok(WsMessage::Close(close_frame))) => {
                    debug!(?close_frame, "upstream sent close frame");
                    let _ = error_tx.try_send(WsError::ConnectionClosed);
                    return;
                }
                Some(Ok(message)) => {
                    if let Some(payload) = websocket::payload_bytes(message) {
                        // Send error only means there are no subscribers right now.
                        let _ = output.send(payload);
                    }
                }
                Some(Err(read_error)) => {
                    let _ = error_tx.try_send(read_error);
                    return;
                }
                None => {
                    let _ = error_tx.try_send(WsError::ConnectionClosed);
                    return;
                }
            }
        }
    }
}

/// Answer an upstream ping with a pong echoing the payload, within [`PONG_DEADLINE`].
async fn send_pong(sink: &Arc<tokio::sync::Mutex<WsSink>>, payload: Bytes) {
    let mut sink = sink.lock().await;

    match tokio::time::timeout(PONG_DEADLINE, sink.send(WsMessage::Pong(payload))).await {
        Ok(Ok(())) => debug!("answered upstream ping"),
        Ok(Err(error)) => error!(%error, "could not send pong to upstream"),
        Err(_) => error!("pong write missed its deadline"),
    }
}
