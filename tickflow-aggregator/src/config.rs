use std::time::Duration;
use tickflow_integration::env;

/// Environment-driven configuration for the aggregator binary.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Control plane HTTP bind address.
    pub server_addr: String,

    pub socket_service: SocketServiceConfig,
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
}

/// Gateway endpoint and dial retry settings.
#[derive(Debug, Clone)]
pub struct SocketServiceConfig {
    pub addr: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Kafka producer settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub required_acks: i32,
    pub max_attempts: u32,
    pub write_timeout: Duration,
}

/// Redis connection, liveness and TTL settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: String,
    pub db: i64,
    pub ttl: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub ping_timeout: Duration,
}

impl AggregatorConfig {
    pub fn from_env() -> Self {
        Self {
            server_addr: env::string("SERVER_ADDR", "0.0.0.0:8088"),
            socket_service: SocketServiceConfig {
                addr: env::string("SOCKET_SERVICE_ADDR", "socket-service:50051"),
                max_retries: env::parse("SOCKET_SERVICE_MAX_RETRIES", 10),
                retry_delay: env::duration("SOCKET_SERVICE_RETRY_DELAY", Duration::from_secs(1)),
            },
            kafka: KafkaConfig {
                brokers: env::list("KAFKA_BROKERS", &["localhost:9092"]),
                topic: env::string("KAFKA_TOPIC", "binance.miniticker"),
                batch_size: env::parse("BATCH_SIZE", 120),
                batch_timeout: env::duration("BATCH_TIMEOUT", Duration::from_secs(2)),
                required_acks: env::parse("ACK", 1),
                max_attempts: env::parse("MAX_ATTEMPTS", 3),
                write_timeout: env::duration("WRITE_TIMEOUT", Duration::from_secs(10)),
            },
            redis: RedisConfig {
                addr: env::string("REDIS_ADDR", "redis:6379"),
                password: env::string("REDIS_PWD", ""),
                db: env::parse("REDIS_DB", 0),
                ttl: env::duration("REDIS_TTL", Duration::from_secs(30)),
                max_retries: env::parse("REDIS_MAX_RETRIES", 10),
                retry_delay: env::duration("REDIS_RETRY_DELAY", Duration::from_secs(2)),
                ping_timeout: env::duration("REDIS_PING_TIMEOUT", Duration::from_secs(5)),
            },
        }
    }
}
