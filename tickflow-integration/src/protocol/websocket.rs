use crate::error::SocketError;
use bytes::Bytes;
use std::fmt::Debug;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, connect_async, tungstenite::client::IntoClientRequest};
use tracing::debug;

/// Convenient type alias for a tungstenite `WebSocketStream`.
pub type WebSocket = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Convenient type alias for the `Sink` half of a tungstenite [`WebSocket`].
pub type WsSink = futures::stream::SplitSink<WebSocket, WsMessage>;

/// Convenient type alias for the `Stream` half of a tungstenite [`WebSocket`].
pub type WsStream = futures::stream::SplitStream<WebSocket>;

/// Communicative type alias for a tungstenite [`WebSocket`] `Message`.
pub type WsMessage = tokio_tungstenite::tungstenite::Message;

/// Communicative type alias for a tungstenite [`WebSocket`] `Error`.
pub type WsError = tokio_tungstenite::tungstenite::Error;

/// Connect asynchronously to a [`WebSocket`] server.
pub async fn connect<R>(request: R) -> Result<WebSocket, SocketError>
where
    R: IntoClientRequest + Unpin + Debug,
{
    debug!(?request, "attempting to establish WebSocket connection");
    connect_async(request)
        .await
        .map(|(websocket, _)| websocket)
        .map_err(|error| SocketError::WebSocket(Box::new(error)))
}

/// Extract the raw payload of a data-bearing [`WsMessage`].
///
/// Text and Binary frames carry payloads; control frames (Ping, Pong, Close, raw Frame)
/// return `None` and are handled by the caller's connection machinery.
pub fn payload_bytes(message: WsMessage) -> Option<Bytes> {
    match message {
        WsMessage::Text(text) => Some(Bytes::from(text)),
        WsMessage::Binary(binary) => Some(binary),
        WsMessage::Ping(payload) => {
            debug!(?payload, "received Ping WebSocket message");
            None
        }
        WsMessage::Pong(payload) => {
            debug!(?payload, "received Pong WebSocket message");
            None
        }
        WsMessage::Close(close_frame) => {
            debug!(payload = ?close_frame, "received CloseFrame WebSocket message");
            None
        }
        WsMessage::Frame(frame) => {
            debug!(payload = ?frame, "received unexpected Frame WebSocket message");
            None
        }
    }
}
