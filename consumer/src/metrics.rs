use lazy_static::lazy_static;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref WORK_UNITS_CLAIMED: Counter = Counter::new(
        "fetchrelay_consumer_work_units_claimed",
        "Number of work units claimed from the work queue"
    )
    .expect("Failed to create WORK_UNITS_CLAIMED counter");
    pub static ref WORK_UNITS_SETTLED: CounterVec = CounterVec::new(
        Opts::new(
            "fetchrelay_consumer_work_units_settled",
            "Number of work units settled, by outcome status"
        ),
        &["status"]
    )
    .expect("Failed to create WORK_UNITS_SETTLED counter");
    pub static ref QUEUE_CLAIM_ERRORS: Counter = Counter::new(
        "fetchrelay_consumer_queue_claim_errors",
        "Number of work queue claim operations that failed"
    )
    .expect("Failed to create QUEUE_CLAIM_ERRORS counter");
    pub static ref QUEUE_SETTLE_ERRORS: Counter = Counter::new(
        "fetchrelay_consumer_queue_settle_errors",
        "Number of work queue settle operations that failed"
    )
    .expect("Failed to create QUEUE_SETTLE_ERRORS counter");
    pub static ref FETCH_TIMEOUTS: Counter = Counter::new(
        "fetchrelay_consumer_fetch_timeouts",
        "Number of worker fetch cycles that timed out waiting for a broker response"
    )
    .expect("Failed to create FETCH_TIMEOUTS counter");
    pub static ref PRODUCER_CONNECTIONS_CREATED: Counter = Counter::new(
        "fetchrelay_consumer_producer_connections_created",
        "Number of kafka fetch connections created by the producer registry"
    )
    .expect("Failed to create PRODUCER_CONNECTIONS_CREATED counter");
    pub static ref PRODUCER_CONNECTION_ERRORS: Counter = Counter::new(
        "fetchrelay_consumer_producer_connection_errors",
        "Number of kafka fetch connections that failed to be created"
    )
    .expect("Failed to create PRODUCER_CONNECTION_ERRORS counter");
    pub static ref WORKER_RESTARTS: Counter = Counter::new(
        "fetchrelay_consumer_worker_restarts",
        "Number of worker threads restarted after an unexpected exit"
    )
    .expect("Failed to create WORKER_RESTARTS counter");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(err) = registry.register(Box::new(WORK_UNITS_CLAIMED.clone())) {
        debug!(logger, "Failed to register WORK_UNITS_CLAIMED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(WORK_UNITS_SETTLED.clone())) {
        debug!(logger, "Failed to register WORK_UNITS_SETTLED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(QUEUE_CLAIM_ERRORS.clone())) {
        debug!(logger, "Failed to register QUEUE_CLAIM_ERRORS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(QUEUE_SETTLE_ERRORS.clone())) {
        debug!(logger, "Failed to register QUEUE_SETTLE_ERRORS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(FETCH_TIMEOUTS.clone())) {
        debug!(logger, "Failed to register FETCH_TIMEOUTS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(PRODUCER_CONNECTIONS_CREATED.clone())) {
        debug!(logger, "Failed to register PRODUCER_CONNECTIONS_CREATED"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(PRODUCER_CONNECTION_ERRORS.clone())) {
        debug!(logger, "Failed to register PRODUCER_CONNECTION_ERRORS"; "error" => ?err);
    }
    if let Err(err) = registry.register(Box::new(WORKER_RESTARTS.clone())) {
        debug!(logger, "Failed to register WORKER_RESTARTS"; "error" => ?err);
    }
}
