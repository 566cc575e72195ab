use std::{sync::Arc, time::Duration};
use tickflow_aggregator::{
    client::GatewayClient, config::AggregatorConfig, daily, dispatch, http, kafka::BatchProducer,
    publisher::{self, RedisPublisher}, second, stream_manager::StreamManager,
};
use tickflow_integration::channel;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

/// Deadline for draining in-flight control plane requests after cancellation.
const HTTP_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(3);

const RAW_CAPACITY: usize = 300;
const LANE_CAPACITY: usize = 100;
const SECOND_CAPACITY: usize = 100;
const DAILY_CAPACITY: usize = 500;
const KAFKA_CAPACITY: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AggregatorConfig::from_env();
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    let (raw_tx, raw_rx) = channel::bounded(RAW_CAPACITY);
    let (agg_trade_tx, agg_trade_rx) = channel::bounded(LANE_CAPACITY);
    let (mini_ticker_tx, mini_ticker_rx) = channel::bounded(LANE_CAPACITY);
    let (second_tx, second_rx) = channel::bounded(SECOND_CAPACITY);
    let (daily_tx, daily_rx) = channel::bounded(DAILY_CAPACITY);
    let (kafka_tx, kafka_rx) = channel::bounded(KAFKA_CAPACITY);

    BatchProducer::probe_cluster(&config.kafka).await;
    let producer = BatchProducer::new(config.kafka.clone())?;
    let redis = RedisPublisher::connect(&config.redis).await?;

    let client = GatewayClient::new(&config.socket_service);
    let manager = Arc::new(StreamManager::new(
        Arc::new(client.clone()),
        raw_tx.clone(),
        token.clone(),
        tracker.clone(),
    ));

    tracker.spawn({
        let token = token.clone();
        let raw_tx = raw_tx.clone();
        async move { client.stream_mini_ticker(token, raw_tx).await }
    });
    tracker.spawn(dispatch::run(
        token.clone(),
        raw_rx,
        agg_trade_tx,
        mini_ticker_tx,
    ));
    tracker.spawn(second::run(token.clone(), agg_trade_rx, second_tx));
    tracker.spawn(daily::run(token.clone(), mini_ticker_rx, daily_tx));
    tracker.spawn(daily::enrich(token.clone(), daily_rx, kafka_tx));
    tracker.spawn(producer.run(token.clone(), kafka_rx));
    tracker.spawn(publisher::run(
        token.clone(),
        second_rx,
        redis,
        Arc::clone(&manager),
        config.redis.ttl,
    ));
    drop(raw_tx);

    let mut control_plane = tokio::spawn(http::serve(
        token.clone(),
        Arc::clone(&manager),
        config.server_addr.clone(),
    ));

    tokio::select! {
        result = &mut control_plane => {
            // Only a bind or serve failure ends the control plane without a signal.
            token.cancel();
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interruption signal");
        }
    }

    token.cancel();

    match tokio::time::timeout(HTTP_SHUTDOWN_DEADLINE, &mut control_plane).await {
        Ok(result) => result??,
        Err(_elapsed) => {
            warn!("control plane missed its shutdown deadline, aborting");
            control_plane.abort();
        }
    }

    info!("waiting for remaining tasks to finish");
    tracker.close();
    tracker.wait().await;

    info!("aggregator shut down");
    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        // Filter messages based on the INFO
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions))
        // Enable Json formatting
        .json()
        .init()
}
