use crate::config::ClickHouseConfig;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Compression, Row, error::Error};
use rust_decimal::Decimal;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tickflow_integration::{channel::BoundedRx, model::KafkaMsg};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Decimal columns are `Decimal64(8)`: RowBinary carries the raw scaled mantissa.
const DECIMAL_SCALE: u32 = 8;

/// One row of the `market_tickers` table, in declared column order.
#[derive(Debug, Clone, Row, Serialize)]
pub struct TickerRow {
    pub message_id: String,
    pub event_type: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub event_time: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub receive_time: DateTime<Utc>,
    pub symbol: String,
    pub close_price: i64,
    pub open_price: i64,
    pub high_price: i64,
    pub low_price: i64,
    pub change_price: i64,
    pub change_percent: i64,
}

/// Scale the decimal to the table's fixed point, saturating on overflow.
fn decimal_e8(value: Decimal) -> i64 {
    let mut scaled = value;
    scaled.rescale(DECIMAL_SCALE);
    scaled
        .mantissa()
        .clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl From<&KafkaMsg> for TickerRow {
    fn from(message: &KafkaMsg) -> Self {
        Self {
            message_id: message.message_id.clone(),
            event_type: message.event_type.clone(),
            event_time: millis_to_datetime(message.event_time),
            receive_time: millis_to_datetime(message.recv_time),
            symbol: message.symbol.clone(),
            close_price: decimal_e8(message.close_price),
            open_price: decimal_e8(message.open_price),
            high_price: decimal_e8(message.high_price),
            low_price: decimal_e8(message.low_price),
            change_price: decimal_e8(message.change_price),
            change_percent: decimal_e8(message.change_percent),
        }
    }
}

fn create_table_ddl(database: &str, table: &str) -> String {
    format!(
        r"CREATE TABLE IF NOT EXISTS {database}.{table} (
            message_id String,
            event_type String,
            event_time DateTime64(3),
            receive_time DateTime64(3),
            symbol String,
            close_price Decimal64(8),
            open_price Decimal64(8),
            high_price Decimal64(8),
            low_price Decimal64(8),
            change_price Decimal64(8),
            change_percent Decimal64(8)
        ) ENGINE = MergeTree()
        ORDER BY (symbol, event_time)
        PARTITION BY toYYYYMM(event_time)
        SETTINGS index_granularity = 8192"
    )
}

/// Batched ClickHouse writer with at-least-once delivery.
///
/// The buffer and every flush run under one lock. A failed insert retains the buffer so
/// the next flush trigger retries the same rows.
pub struct TickerRepository {
    client: Client,
    config: ClickHouseConfig,
    buffer: tokio::sync::Mutex<Vec<TickerRow>>,
}

impl std::fmt::Debug for TickerRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerRepository")
            .field("config", &self.config)
            .finish()
    }
}

impl TickerRepository {
    /// Connect and verify liveness with bounded, linearly backed-off retries.
    pub async fn connect(config: ClickHouseConfig) -> Result<Self, Error> {
        debug!(addr = config.addr, database = config.database, "connecting to clickhouse");

        let client = Client::default()
            .with_url(&config.addr)
            .with_database(&config.database)
            .with_user(&config.username)
            .with_password(&config.password)
            .with_compression(Compression::Lz4);

        let mut last_error = None;
        for attempt in 0..config.max_retries {
            match tokio::time::timeout(
                config.dial_timeout,
                client.query("SELECT 1").fetch_one::<u8>(),
            )
            .await
            {
                Ok(Ok(_)) => {
                    info!(addr = config.addr, "connected to clickhouse");
                    let buffer = tokio::sync::Mutex::new(Vec::with_capacity(config.batch_size));
                    return Ok(Self {
                        client,
                        config,
                        buffer,
                    });
                }
                Ok(Err(ping_error)) => {
                    let delay = Duration::from_secs(1) * (attempt + 1);
                    warn!(attempt = attempt + 1, ?delay, %ping_error, "failed to connect to clickhouse, retrying");
                    last_error = Some(ping_error);
                    tokio::time::sleep(delay).await;
                }
                Err(_elapsed) => {
                    let delay = Duration::from_secs(1) * (attempt + 1);
                    warn!(attempt = attempt + 1, ?delay, "clickhouse ping timed out, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Custom("clickhouse unreachable after all retries".into())))
    }

    /// Create the target table. The statement is idempotent across restarts; failure
    /// here is fatal for the binary.
    pub async fn ensure_table(&self) -> Result<(), Error> {
        info!(table = self.config.table, "creating table if not exists");

        let ddl = create_table_ddl(&self.config.database, &self.config.table);
        self.client.query(&ddl).execute().await?;

        info!(table = self.config.table, "table ready");
        Ok(())
    }

    /// Run the batch inserter until the input closes or the token cancels, draining the
    /// buffer on exit.
    pub async fn run(self: Arc<Self>, token: CancellationToken, mut input: BoundedRx<KafkaMsg>) {
        info!(
            batch_size = self.config.batch_size,
            batch_timeout = ?self.config.batch_timeout,
            "batch inserter started"
        );

        let mut flush_timer = tokio::time::interval(self.config.batch_timeout);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_timer.reset();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.drain().await;
                    return;
                }
                _ = flush_timer.tick() => {
                    let mut buffer = self.buffer.lock().await;
                    if let Err(insert_error) = self.insert(&mut buffer).await {
                        error!(%insert_error, "failed to insert batch");
                    }
                }
                message = input.recv() => {
                    let Some(message) = message else {
                        self.drain().await;
                        return;
                    };

                    let mut buffer = self.buffer.lock().await;
                    buffer.push(TickerRow::from(&message));

                    if buffer.len() >= self.config.batch_size {
                        debug!(size = buffer.len(), "batch full, inserting");
                        if let Err(insert_error) = self.insert(&mut buffer).await {
                            error!(%insert_error, "failed to insert batch");
                        }
                        flush_timer.reset();
                    }
                }
            }
        }
    }

    /// Final flush attempt before shutdown.
    async fn drain(&self) {
        let mut buffer = self.buffer.lock().await;
        if !buffer.is_empty() {
            info!(size = buffer.len(), "inserting remaining rows before shutdown");
            if let Err(insert_error) = self.insert(&mut buffer).await {
                error!(%insert_error, "failed to insert remaining batch");
            }
        }
        info!("batch inserter stopped");
    }

    /// Write the buffered rows in one INSERT. The buffer is cleared only on success.
    async fn insert(&self, buffer: &mut Vec<TickerRow>) -> Result<(), Error> {
        if buffer.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let mut insert = self.client.insert::<TickerRow>(&self.config.table).await?;
        for row in buffer.iter() {
            insert.write(row).await?;
        }
        insert.end().await?;

        info!(size = buffer.len(), elapsed = ?start.elapsed(), "batch inserted");
        buffer.clear();
        Ok(())
    }
}
