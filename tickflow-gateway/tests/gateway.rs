use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tickflow_gateway::{
    config::GatewayConfig,
    registry::ConnectionRegistry,
    server::{self, ForwardStats},
};
use tickflow_integration::{model::Symbol, protocol::websocket::WsMessage};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

fn test_config(upstream: SocketAddr) -> GatewayConfig {
    GatewayConfig {
        server_addr: "127.0.0.1:0".to_string(),
        mini_ticker_url: format!("ws://{upstream}/miniticker"),
        agg_trade_url: format!("ws://{upstream}/"),
    }
}

fn test_registry(upstream: SocketAddr) -> Arc<ConnectionRegistry> {
    Arc::new(ConnectionRegistry::new(
        test_config(upstream),
        CancellationToken::new(),
        TaskTracker::new(),
    ))
}

/// Fake exchange closing the connection after its first frame, then serving a second
/// connection that stays open.
async fn spawn_flaky_exchange() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut connection = 0u32;
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            connection += 1;

            let mut websocket = tokio_tungstenite::accept_async(stream).await.unwrap();
            websocket
                .send(WsMessage::text(format!(r#"{{"connection":{connection}}}"#)))
                .await
                .unwrap();

            if connection == 1 {
                let _ = websocket.close(None).await;
            } else {
                while let Some(Ok(_)) = websocket.next().await {}
            }
        }
    });

    addr
}

#[tokio::test]
async fn test_connector_survives_upstream_flake_in_order() {
    let upstream = spawn_flaky_exchange().await;
    let registry = test_registry(upstream);

    let mut rx = registry.subscribe_mini_ticker();

    let first = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first frame timed out")
        .unwrap();
    assert_eq!(first, Bytes::from_static(br#"{"connection":1}"#));

    // Reconnect happens within the jittered backoff bounds.
    let second = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("frame after reconnect timed out")
        .unwrap();
    assert_eq!(second, Bytes::from_static(br#"{"connection":2}"#));
}

#[tokio::test]
async fn test_connector_answers_ping_with_payload_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();

    let (pong_tx, mut pong_rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut websocket = tokio_tungstenite::accept_async(stream).await.unwrap();

        websocket
            .send(WsMessage::Ping(Bytes::from_static(b"hello")))
            .await
            .unwrap();

        while let Some(Ok(message)) = websocket.next().await {
            if let WsMessage::Pong(payload) = message {
                pong_tx.send(payload).await.unwrap();
                break;
            }
        }
    });

    let registry = test_registry(upstream);
    let _rx = registry.subscribe_mini_ticker();

    let pong = timeout(Duration::from_secs(5), pong_rx.recv())
        .await
        .expect("pong timed out")
        .unwrap();
    assert_eq!(pong, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_registry_reuses_connection_per_symbol() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut websocket = tokio_tungstenite::accept_async(stream).await.unwrap();
                websocket
                    .send(WsMessage::text(r#"{"s":"ethusdt"}"#))
                    .await
                    .unwrap();
                while let Some(Ok(_)) = websocket.next().await {}
            });
        }
    });

    let registry = test_registry(upstream);

    let mut first = registry.subscribe_agg_trade(Symbol::new("ETHUSDT"));
    let mut second = registry.subscribe_agg_trade(Symbol::new("ethusdt"));
    assert_eq!(registry.connection_count(), 1);

    // Both subscribers observe the one upstream connection's frames.
    let frame = timeout(Duration::from_secs(5), first.recv())
        .await
        .expect("first subscriber timed out")
        .unwrap();
    assert_eq!(frame, Bytes::from_static(br#"{"s":"ethusdt"}"#));
    let frame = timeout(Duration::from_secs(5), second.recv())
        .await
        .expect("second subscriber timed out")
        .unwrap();
    assert_eq!(frame, Bytes::from_static(br#"{"s":"ethusdt"}"#));

    let _third = registry.subscribe_agg_trade(Symbol::new("btcusdt"));
    assert_eq!(registry.connection_count(), 2);
}

#[tokio::test]
async fn test_forward_accounts_for_lagged_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (source_tx, source_rx) = broadcast::channel::<Bytes>(16);
    for sequence in 0u64..10_000 {
        source_tx.send(Bytes::from(sequence.to_string())).unwrap();
    }
    drop(source_tx);

    let forwarder: tokio::task::JoinHandle<ForwardStats> = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let websocket = tokio_tungstenite::accept_async(stream).await.unwrap();
        server::forward(CancellationToken::new(), source_rx, websocket).await
    });

    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    let reader = tokio::spawn(async move {
        let mut forwarded = 0u64;
        while let Some(Ok(message)) = client.next().await {
            if matches!(message, WsMessage::Binary(_)) {
                forwarded += 1;
            }
        }
        forwarded
    });

    let stats = timeout(Duration::from_secs(5), forwarder)
        .await
        .expect("forwarder timed out")
        .unwrap();

    assert_eq!(stats.received() + stats.dropped(), 10_000);
    assert_eq!(stats.received(), 16);
    let forwarded = timeout(Duration::from_secs(5), reader).await.unwrap().unwrap();
    assert_eq!(forwarded, stats.received());
}
