use crate::{config::RedisConfig, stream_manager::FollowerLookup};
use redis::RedisError;
use std::{future::Future, sync::Arc, time::Duration};
use tickflow_integration::{channel::BoundedRx, model::SecondStat};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Logical pub/sub channel carrying per-subscriber [`SecondStat`] records.
pub const STREAM_CHANNEL: &str = "stream";

/// Sink for published stats. The production implementation is Redis; tests record.
pub trait Publish: Send {
    /// Publish the payload on the provided logical channel.
    fn publish(
        &mut self,
        channel: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), RedisError>> + Send;

    /// Store the payload under the key with the provided TTL, for late readers.
    fn store(
        &mut self,
        key: &str,
        payload: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), RedisError>> + Send;
}

/// Redis-backed [`Publish`] implementation over a multiplexed connection.
#[derive(Clone)]
pub struct RedisPublisher {
    connection: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher").finish()
    }
}

impl RedisPublisher {
    /// Connect and ping with bounded retries; exhaustion is a startup failure.
    pub async fn connect(config: &RedisConfig) -> Result<Self, RedisError> {
        let (host, port) = match config.addr.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(6379)),
            None => (config.addr.clone(), 6379),
        };

        let client = redis::Client::open(redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(host, port),
            redis: redis::RedisConnectionInfo {
                db: config.db,
                username: None,
                password: if config.password.is_empty() {
                    None
                } else {
                    Some(config.password.clone())
                },
            },
        })?;

        let mut last_error: Option<RedisError> = None;
        for attempt in 0..config.max_retries {
            match Self::ping(&client, config.ping_timeout).await {
                Ok(connection) => {
                    info!(addr = config.addr, "connected to redis");
                    return Ok(Self { connection });
                }
                Err(ping_error) => {
                    warn!(
                        attempt = attempt + 1,
                        delay = ?config.retry_delay,
                        %ping_error,
                        "redis not available yet"
                    );
                    last_error = Some(ping_error);
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RedisError::from((redis::ErrorKind::IoError, "redis unreachable"))
        }))
    }

    async fn ping(
        client: &redis::Client,
        timeout: Duration,
    ) -> Result<redis::aio::ConnectionManager, RedisError> {
        let mut connection = redis::aio::ConnectionManager::new(client.clone()).await?;

        match tokio::time::timeout(
            timeout,
            redis::cmd("PING").query_async::<_, String>(&mut connection),
        )
        .await
        {
            Ok(Ok(_pong)) => Ok(connection),
            Ok(Err(ping_error)) => Err(ping_error),
            Err(_elapsed) => Err(RedisError::from((
                redis::ErrorKind::IoError,
                "redis ping timed out",
            ))),
        }
    }
}

impl Publish for RedisPublisher {
    async fn publish(&mut self, channel: &str, payload: String) -> Result<(), RedisError> {
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut self.connection)
            .await
    }

    async fn store(&mut self, key: &str, payload: String, ttl: Duration) -> Result<(), RedisError> {
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<_, ()>(&mut self.connection)
            .await
    }
}

/// For each consumed [`SecondStat`], store the latest value under the symbol key and
/// publish one stamped record per follower on the `stream` channel.
///
/// Per-subscriber failures are logged and skipped; the publisher never buffers.
pub async fn run<P, F>(
    token: CancellationToken,
    mut stats: BoundedRx<SecondStat>,
    mut publisher: P,
    followers: Arc<F>,
    ttl: Duration,
) where
    P: Publish,
    F: FollowerLookup + ?Sized,
{
    info!("starting fanout publisher");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("stopping fanout publisher");
                return;
            }
            stat = stats.recv() => {
                let Some(stat) = stat else {
                    info!("per-second channel closed, stopping fanout publisher");
                    return;
                };

                match serde_json::to_string(&stat) {
                    Ok(payload) => {
                        if let Err(store_error) =
                            publisher.store(stat.symbol.as_ref(), payload, ttl).await
                        {
                            error!(symbol = %stat.symbol, %store_error, "could not store second stat");
                        }
                    }
                    Err(serialise_error) => {
                        error!(%serialise_error, "could not serialise second stat")
                    }
                }

                for user_id in followers.followers(&stat.symbol) {
                    let stamped = stat.with_user(user_id);
                    let payload = match serde_json::to_string(&stamped) {
                        Ok(payload) => payload,
                        Err(serialise_error) => {
                            error!(%serialise_error, "could not serialise second stat");
                            continue;
                        }
                    };

                    if let Err(publish_error) = publisher.publish(STREAM_CHANNEL, payload).await {
                        error!(
                            symbol = %stat.symbol,
                            user_id,
                            %publish_error,
                            "could not publish second stat"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::Mutex};
    use tickflow_integration::{channel, model::Symbol};

    #[derive(Debug, Clone, Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<(String, String)>>>,
        stored: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl Publish for RecordingPublisher {
        async fn publish(&mut self, channel: &str, payload: String) -> Result<(), RedisError> {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), payload));
            Ok(())
        }

        async fn store(
            &mut self,
            key: &str,
            payload: String,
            _ttl: Duration,
        ) -> Result<(), RedisError> {
            self.stored.lock().unwrap().push((key.to_string(), payload));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FixedFollowers(HashMap<Symbol, Vec<u64>>);

    impl FollowerLookup for FixedFollowers {
        fn followers(&self, symbol: &Symbol) -> Vec<u64> {
            self.0.get(symbol).cloned().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_publishes_one_record_per_follower() {
        let (stats_tx, stats_rx) = channel::bounded(4);
        let publisher = RecordingPublisher::default();
        let published = Arc::clone(&publisher.published);
        let stored = Arc::clone(&publisher.stored);

        let followers = Arc::new(FixedFollowers(HashMap::from([(
            Symbol::new("ethusdt"),
            vec![1, 2],
        )])));

        let token = CancellationToken::new();
        let fanout = tokio::spawn(run(
            token.clone(),
            stats_rx,
            publisher,
            followers,
            Duration::from_secs(30),
        ));

        stats_tx
            .send(SecondStat::new(Symbol::new("ethusdt"), 2000.5))
            .await
            .unwrap();
        drop(stats_tx);
        fanout.await.unwrap();

        let published = published.lock().unwrap();
        assert_eq!(
            *published,
            vec![
                (
                    STREAM_CHANNEL.to_string(),
                    r#"{"s":"ethusdt","p":2000.5,"user_id":1}"#.to_string()
                ),
                (
                    STREAM_CHANNEL.to_string(),
                    r#"{"s":"ethusdt","p":2000.5,"user_id":2}"#.to_string()
                ),
            ]
        );

        let stored = stored.lock().unwrap();
        assert_eq!(
            *stored,
            vec![("ethusdt".to_string(), r#"{"s":"ethusdt","p":2000.5}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn test_symbol_without_followers_publishes_nothing() {
        let (stats_tx, stats_rx) = channel::bounded(4);
        let publisher = RecordingPublisher::default();
        let published = Arc::clone(&publisher.published);

        let followers = Arc::new(FixedFollowers::default());
        let fanout = tokio::spawn(run(
            CancellationToken::new(),
            stats_rx,
            publisher,
            followers,
            Duration::from_secs(30),
        ));

        stats_tx
            .send(SecondStat::new(Symbol::new("btcusdt"), 1.0))
            .await
            .unwrap();
        drop(stats_tx);
        fanout.await.unwrap();

        assert!(published.lock().unwrap().is_empty());
    }
}
