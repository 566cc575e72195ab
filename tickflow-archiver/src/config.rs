use std::time::Duration;
use tickflow_integration::env;

/// Environment-driven configuration for the archiver binary.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub kafka: ConsumerConfig,
    pub clickhouse: ClickHouseConfig,
}

/// Kafka consumer group settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// ClickHouse connection and batch settings.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub addr: String,
    pub database: String,
    pub table: String,
    pub username: String,
    pub password: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_retries: u32,
    pub dial_timeout: Duration,
}

impl ArchiverConfig {
    pub fn from_env() -> Self {
        Self {
            kafka: ConsumerConfig {
                brokers: env::list("KAFKA_BROKERS", &["localhost:9092"]),
                topic: env::string("KAFKA_TOPIC", "binance.miniticker"),
                group_id: env::string("KAFKA_GROUP_ID", "clickhouse-consumer-group"),
                max_retries: env::parse("KAFKA_MAX_RETRIES", 5),
                retry_delay: env::duration("KAFKA_RETRY_DELAY", Duration::from_secs(2)),
                session_timeout: env::duration("KAFKA_SESSION_TIMEOUT", Duration::from_secs(10)),
                heartbeat_interval: env::duration(
                    "KAFKA_HEARTBEAT_INTERVAL",
                    Duration::from_secs(3),
                ),
            },
            clickhouse: ClickHouseConfig {
                addr: env::string("CLICKHOUSE_ADDR", "http://localhost:8123"),
                database: env::string("CLICKHOUSE_DATABASE", "crypto"),
                table: env::string("CLICKHOUSE_TABLE", "market_tickers"),
                username: env::string("CLICKHOUSE_USERNAME", "default"),
                password: env::string("CLICKHOUSE_PASSWORD", ""),
                batch_size: env::parse("BATCH_SIZE", 1000),
                batch_timeout: env::duration("BATCH_TIMEOUT", Duration::from_secs(5)),
                max_retries: env::parse("CLICKHOUSE_MAX_RETRIES", 3),
                dial_timeout: env::duration("CLICKHOUSE_DIAL_TIMEOUT", Duration::from_secs(10)),
            },
        }
    }
}
