use crate::config::ConsumerConfig;
use rdkafka::{
    ClientConfig, Message,
    consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
};
use std::time::Duration;
use tickflow_integration::{channel::BoundedTx, model::KafkaMsg};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka consumer decoding [`KafkaMsg`] payloads and forwarding them to the batch
/// writer.
///
/// Offsets are committed after the decoded row is handed downstream; undecodable
/// payloads are committed and skipped so one poison message cannot wedge the partition.
pub struct TickerConsumer {
    consumer: StreamConsumer,
    config: ConsumerConfig,
}

impl std::fmt::Debug for TickerConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerConsumer")
            .field("config", &self.config)
            .finish()
    }
}

impl TickerConsumer {
    /// Liveness probe mirroring the producer side: fetch cluster metadata from the
    /// first broker with bounded retries. Failure is logged but not fatal.
    pub async fn probe_cluster(config: &ConsumerConfig) {
        let Some(broker) = config.brokers.first().cloned() else {
            warn!("no kafka brokers configured, skipping probe");
            return;
        };

        info!(
            broker,
            topic = config.topic,
            group_id = config.group_id,
            "checking kafka availability"
        );
        for attempt in 0..config.max_retries {
            let broker = broker.clone();
            let metadata = tokio::task::spawn_blocking(move || {
                let probe: BaseConsumer = ClientConfig::new()
                    .set("bootstrap.servers", &broker)
                    .create()?;
                probe
                    .fetch_metadata(None, PROBE_TIMEOUT)
                    .map(|metadata| metadata.brokers().len())
            })
            .await;

            match metadata {
                Ok(Ok(broker_count)) => {
                    info!(brokers = broker_count, "kafka is available");
                    return;
                }
                Ok(Err(probe_error)) => {
                    warn!(
                        attempt = attempt + 1,
                        delay = ?config.retry_delay,
                        %probe_error,
                        "kafka not available yet"
                    );
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(join_error) => {
                    warn!(%join_error, "kafka probe task failed");
                    return;
                }
            }
        }

        error!("could not verify kafka availability after all retries");
    }

    pub fn new(config: ConsumerConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", config.brokers.join(","))
            .set("session.timeout.ms", config.session_timeout.as_millis().to_string())
            .set(
                "heartbeat.interval.ms",
                config.heartbeat_interval.as_millis().to_string(),
            )
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .create()?;

        consumer.subscribe(&[&config.topic])?;
        info!(topic = config.topic, group_id = config.group_id, "kafka consumer initialized");

        Ok(Self { consumer, config })
    }

    /// Run until the token cancels; the output closes when this task returns.
    pub async fn run(self, token: CancellationToken, out: BoundedTx<KafkaMsg>) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping kafka consumer");
                    return;
                }
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(receive_error) => {
                            error!(%receive_error, "could not read message from kafka");
                            tokio::select! {
                                _ = token.cancelled() => return,
                                _ = tokio::time::sleep(self.config.retry_delay) => continue,
                            }
                        }
                    };

                    let Some(payload) = message.payload() else {
                        self.commit(&message);
                        continue;
                    };

                    let row = match serde_json::from_slice::<KafkaMsg>(payload) {
                        Ok(row) => row,
                        Err(parse_error) => {
                            error!(
                                %parse_error,
                                offset = message.offset(),
                                partition = message.partition(),
                                "failed to parse kafka message"
                            );
                            self.commit(&message);
                            continue;
                        }
                    };

                    tokio::select! {
                        _ = token.cancelled() => {
                            info!("stopping kafka consumer");
                            return;
                        }
                        sent = out.send(row) => {
                            if sent.is_err() {
                                info!("row channel closed, stopping kafka consumer");
                                return;
                            }
                            debug!(
                                offset = message.offset(),
                                partition = message.partition(),
                                "message committed"
                            );
                            self.commit(&message);
                        }
                    }
                }
            }
        }
    }

    fn commit(&self, message: &rdkafka::message::BorrowedMessage<'_>) {
        if let Err(commit_error) = self.consumer.commit_message(message, CommitMode::Async) {
            error!(%commit_error, "failed to commit message");
        }
    }
}
