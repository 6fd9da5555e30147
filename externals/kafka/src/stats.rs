use std::sync::Arc;
use std::sync::Mutex;

use rdkafka::client::ClientContext;
use rdkafka::consumer::ConsumerContext;
use rdkafka::statistics::Statistics;
use slog::debug;
use slog::Logger;

use fetchrelay_service_healthcheck::HealthCheck;
use fetchrelay_service_healthcheck::HealthStatus;

use super::metrics::KAFKA_STATS_BROKERS_DOWN;

/// `rdkafka` client/consumer context that derives a `HealthStatus` from librdkafka statistics.
///
/// Passed to every `BaseConsumer`/`FutureProducer` this crate creates so brokers going up or
/// down is reflected in the healthcheck without polling metadata separately.
#[derive(Clone)]
pub struct ClientStatsContext {
    health: Arc<Mutex<HealthStatus>>,
    logger: Logger,
}

impl ClientStatsContext {
    pub fn new(logger: Logger) -> ClientStatsContext {
        let health = Arc::new(Mutex::new(HealthStatus::Degraded(
            "no statistics received yet".into(),
        )));
        ClientStatsContext { health, logger }
    }

    /// Return a healthchecker that reports the latest statistics-derived status.
    pub fn healthchecker(&self) -> KafkaHealthChecker {
        KafkaHealthChecker {
            health: Arc::clone(&self.health),
        }
    }

    fn update(&self, health: HealthStatus) {
        *self.health.lock().expect("ClientStatsContext lock poisoned") = health;
    }
}

impl ClientContext for ClientStatsContext {
    fn stats(&self, stats: Statistics) {
        let total = stats.brokers.len();
        let down = stats
            .brokers
            .values()
            .filter(|broker| broker.state != "UP")
            .count();
        KAFKA_STATS_BROKERS_DOWN.set(down as f64);
        debug!(self.logger, "Received kafka client statistics"; "brokers" => total, "down" => down);
        let health = if total == 0 {
            HealthStatus::Degraded("no brokers known yet".into())
        } else if down == total {
            HealthStatus::Failed("all kafka brokers are down".into())
        } else if down > 0 {
            HealthStatus::Degraded("some kafka brokers are down".into())
        } else {
            HealthStatus::Healthy
        };
        self.update(health);
    }
}

impl ConsumerContext for ClientStatsContext {}

/// Healthcheck handle reporting the latest status observed by a `ClientStatsContext`.
#[derive(Clone)]
pub struct KafkaHealthChecker {
    health: Arc<Mutex<HealthStatus>>,
}

impl HealthCheck for KafkaHealthChecker {
    fn check(&self) -> HealthStatus {
        self.health.lock().expect("ClientStatsContext lock poisoned").clone()
    }
}
