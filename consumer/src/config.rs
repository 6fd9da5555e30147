use serde::Deserialize;
use serde::Serialize;

use fetchrelay_externals_kafka::CommonConfig as KafkaConfig;

/// Redis connection pool configuration.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis endpoint host.
    #[serde(default = "RedisConfig::default_host")]
    pub host: String,

    /// Redis endpoint port.
    #[serde(default = "RedisConfig::default_port")]
    pub port: u16,

    /// Optional password used to authenticate with redis.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-command timeout, in milliseconds.
    #[serde(default = "RedisConfig::default_timeout")]
    pub timeout: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "RedisConfig::default_max_active")]
    pub max_active: u32,
}

impl Default for RedisConfig {
    fn default() -> RedisConfig {
        RedisConfig {
            host: RedisConfig::default_host(),
            port: RedisConfig::default_port(),
            password: None,
            timeout: RedisConfig::default_timeout(),
            max_active: RedisConfig::default_max_active(),
        }
    }
}

impl RedisConfig {
    fn default_host() -> String {
        "localhost".into()
    }
    fn default_port() -> u16 {
        6379
    }
    fn default_timeout() -> u64 {
        4000
    }
    fn default_max_active() -> u32 {
        20
    }

    /// Build the `redis://` connection URL this pool should dial.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Names of the three Redis lists backing the work queue protocol.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct QueueNames {
    /// List new work units are published to.
    pub work_queue: String,

    /// List work units are moved to once claimed, until settled.
    pub working_queue: String,

    /// List settled outcomes are appended to.
    pub complete_queue: String,
}

/// Consumer coordination engine configuration.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Redis connection pool configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Redis list names used by the work queue protocol.
    pub queues: QueueNames,

    /// Kafka fetch client configuration shared by every producer connection.
    pub kafka: KafkaConfig,

    /// Number of worker threads to spawn.
    #[serde(default = "Config::default_consumer_threads")]
    pub consumer_threads: u16,

    /// Capacity of the worker pool's internal dispatch queue.
    #[serde(default = "Config::default_consumer_queue_limit")]
    pub consumer_queue_limit: usize,

    /// Per-unit fetch wait, in milliseconds.
    #[serde(default = "Config::default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Capacity of the downstream message channel.
    #[serde(default = "Config::default_downstream_channel_capacity")]
    pub downstream_channel_capacity: usize,

    /// Grace period allowed for worker threads to exit on shutdown, in milliseconds.
    #[serde(default = "Config::default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Config {
    fn default_consumer_threads() -> u16 {
        1
    }
    fn default_consumer_queue_limit() -> usize {
        10
    }
    fn default_fetch_timeout() -> u64 {
        10_000
    }
    fn default_downstream_channel_capacity() -> usize {
        100
    }
    fn default_shutdown_grace_ms() -> u64 {
        10_000
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use super::RedisConfig;

    #[test]
    fn redis_url_without_password() {
        let config = RedisConfig::default();
        assert_eq!(config.url(), "redis://localhost:6379");
    }

    #[test]
    fn redis_url_with_password() {
        let mut config = RedisConfig::default();
        config.password = Some("s3cr3t".into());
        assert_eq!(config.url(), "redis://:s3cr3t@localhost:6379");
    }

    #[test]
    fn deserialize_minimal_config_applies_defaults() {
        let json = r#"{
            "queues": {
                "work_queue": "work",
                "working_queue": "working",
                "complete_queue": "complete"
            },
            "kafka": {"brokers": "localhost:9092"}
        }"#;
        let config: Config = serde_json::from_str(json).expect("config should parse");
        assert_eq!(config.consumer_threads, 1);
        assert_eq!(config.fetch_timeout, 10_000);
        assert_eq!(config.queues.work_queue, "work");
        assert_eq!(config.redis.host, "localhost");
    }
}
