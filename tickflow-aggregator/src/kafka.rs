use crate::config::KafkaConfig;
use rdkafka::{
    ClientConfig,
    consumer::{BaseConsumer, Consumer},
    error::KafkaError,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
};
use std::time::{Duration, Instant};
use tickflow_integration::{channel::BoundedRx, model::KafkaMsg};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROBE_ATTEMPTS: u32 = 10;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Batched at-least-once producer delivering [`KafkaMsg`] records to a single topic,
/// keyed and hash-partitioned by symbol, snappy-compressed.
///
/// The buffer flushes on size, timer, input close, and shutdown drain. Per-record
/// delivery retries belong to the broker client (`message.send.max.retries`); a batch
/// that still fails is logged and the buffer cleared.
pub struct BatchProducer {
    producer: FutureProducer,
    config: KafkaConfig,
    buffer: Vec<KafkaMsg>,
}

impl std::fmt::Debug for BatchProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProducer")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl BatchProducer {
    /// Liveness probe: fetch cluster metadata from the first broker with linearly
    /// increasing backoff. Failure is logged but does not abort startup.
    pub async fn probe_cluster(config: &KafkaConfig) {
        let Some(broker) = config.brokers.first().cloned() else {
            warn!("no kafka brokers configured, skipping probe");
            return;
        };

        info!(broker, topic = config.topic, "checking kafka availability");
        for attempt in 0..PROBE_ATTEMPTS {
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
                    let delay = Duration::from_secs(2) * (attempt + 1);
                    warn!(attempt = attempt + 1, ?delay, %probe_error, "kafka not available yet");
                    tokio::time::sleep(delay).await;
                }
                Err(join_error) => {
                    warn!(%join_error, "kafka probe task failed");
                    return;
                }
            }
        }

        error!("could not verify kafka availability after all retries");
    }

    pub fn new(config: KafkaConfig) -> Result<Self, KafkaError> {
        info!(brokers = ?config.brokers, topic = config.topic, "initializing kafka producer");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("acks", config.required_acks.to_string())
            .set("message.send.max.retries", config.max_attempts.to_string())
            .set("message.timeout.ms", config.write_timeout.as_millis().to_string())
            .set("compression.codec", "snappy")
            .create()?;

        let buffer = Vec::with_capacity(config.batch_size);
        Ok(Self {
            producer,
            config,
            buffer,
        })
    }

    /// Run until the input closes or the token cancels, draining the buffer on exit.
    pub async fn run(mut self, token: CancellationToken, mut input: BoundedRx<KafkaMsg>) {
        info!("kafka producer started");

        let mut flush_timer = tokio::time::interval(self.config.batch_timeout);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_timer.reset();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    if !self.buffer.is_empty() {
                        info!(count = self.buffer.len(), "sending remaining messages before shutdown");
                        self.flush().await;
                    }
                    info!("stopping kafka producer");
                    return;
                }
                _ = flush_timer.tick() => {
                    if !self.buffer.is_empty() {
                        debug!(size = self.buffer.len(), "timer triggered, sending batch");
                        self.flush().await;
                    }
                }
                message = input.recv() => {
                    let Some(message) = message else {
                        if !self.buffer.is_empty() {
                            info!(count = self.buffer.len(), "input channel closed, sending remaining messages");
                            self.flush().await;
                        }
                        return;
                    };

                    self.buffer.push(message);
                    if self.buffer.len() >= self.config.batch_size {
                        debug!(size = self.buffer.len(), "batch full, sending");
                        self.flush().await;
                        flush_timer.reset();
                    }
                }
            }
        }
    }

    /// Enqueue every buffered record and await all broker acknowledgements.
    ///
    /// The buffer is cleared even after a failed batch; retries within one write are
    /// owned by librdkafka.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let start = Instant::now();
        let mut deliveries = Vec::with_capacity(self.buffer.len());

        for message in &self.buffer {
            let payload = match serde_json::to_vec(message) {
                Ok(payload) => payload,
                Err(serialise_error) => {
                    error!(%serialise_error, "could not serialise message into JSON");
                    continue;
                }
            };

            let record = FutureRecord::to(&self.config.topic)
                .key(&message.symbol)
                .payload(&payload)
                .timestamp(message.recv_time)
                .headers(OwnedHeaders::new().insert(Header {
                    key: "message_id",
                    value: Some(message.message_id.as_str()),
                }));

            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push(delivery),
                Err((enqueue_error, _record)) => {
                    error!(%enqueue_error, "could not enqueue message")
                }
            }
        }

        let batch_size = deliveries.len();
        let mut failed = 0usize;
        for delivery in deliveries {
            match delivery.await {
                Ok(Ok(_partition_offset)) => {}
                Ok(Err((delivery_error, _message))) => {
                    failed += 1;
                    error!(%delivery_error, "broker rejected message");
                }
                Err(_cancelled) => failed += 1,
            }
        }

        let elapsed = start.elapsed();
        if failed > 0 {
            error!(failed, batch_size, ?elapsed, "failed to send batch to kafka");
        } else {
            info!(batch_size, ?elapsed, "sent batch to kafka");
        }

        self.buffer.clear();
    }
}
