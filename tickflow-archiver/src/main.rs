use std::sync::Arc;
use tickflow_archiver::{
    config::ArchiverConfig, consumer::TickerConsumer, repository::TickerRepository,
};
use tickflow_integration::channel;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

const ROW_QUEUE_CAPACITY: usize = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ArchiverConfig::from_env();
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    TickerConsumer::probe_cluster(&config.kafka).await;
    let consumer = TickerConsumer::new(config.kafka.clone())?;

    let repository = Arc::new(TickerRepository::connect(config.clickhouse.clone()).await?);
    repository.ensure_table().await?;

    let (rows_tx, rows_rx) = channel::bounded(ROW_QUEUE_CAPACITY);
    tracker.spawn(consumer.run(token.clone(), rows_tx));
    tracker.spawn(Arc::clone(&repository).run(token.clone(), rows_rx));

    tokio::signal::ctrl_c().await?;
    info!("received interruption signal");
    token.cancel();

    info!("waiting for remaining tasks to finish");
    tracker.close();
    tracker.wait().await;

    info!("archiver shut down");
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
