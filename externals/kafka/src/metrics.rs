use lazy_static::lazy_static;
use prometheus::Gauge;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref KAFKA_STATS_BROKERS_DOWN: Gauge = Gauge::new(
        "fetchrelay_kafka_brokers_down",
        "Number of brokers reported down by the most recent librdkafka statistics event"
    )
    .expect("Failed to create KAFKA_STATS_BROKERS_DOWN gauge");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(KAFKA_STATS_BROKERS_DOWN.clone())) {
        debug!(logger, "Failed to register KAFKA_STATS_BROKERS_DOWN"; "error" => ?err);
    }
}
