use std::sync::Arc;
use tickflow_gateway::{config::GatewayConfig, registry::ConnectionRegistry, server};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = GatewayConfig::from_env();
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    let registry = Arc::new(ConnectionRegistry::new(
        config.clone(),
        token.clone(),
        tracker.clone(),
    ));

    let mut server = tokio::spawn(server::run(
        token.clone(),
        Arc::clone(&registry),
        config.server_addr.clone(),
        tracker.clone(),
    ));

    tokio::select! {
        result = &mut server => {
            // Only a bind failure ends the server without a signal.
            token.cancel();
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interruption signal");
        }
    }

    token.cancel();
    registry.close_all();

    info!("waiting for remaining tasks to finish");
    tracker.close();
    tracker.wait().await;
    server.await??;

    info!("gateway shut down");
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
