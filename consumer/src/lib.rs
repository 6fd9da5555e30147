//! Distributed Kafka consumer coordination engine.
//!
//! Coordinates a pool of worker threads across a fleet of consumer processes through a
//! Redis-backed three-list queue, fetching from per-broker Kafka connections created on demand
//! and forwarding accepted messages to a downstream channel. See `reader`, `registry`, `queue`,
//! `worker` and `supervisor` for the five coordinating components.
//!
//! External planners that produce work units talk to this crate through [`WorkQueue::publish`],
//! the same queue type the [`Supervisor`] builds internally for its dispatcher and workers.

mod config;
mod error;
mod metrics;
pub mod mock;
mod queue;
mod reader;
mod registry;
mod supervisor;
mod worker;
mod work_unit;

use prometheus::Registry as MetricsRegistry;
use slog::Logger;

pub use self::config::Config;
pub use self::config::QueueNames;
pub use self::config::RedisConfig;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::queue::build_pool;
pub use self::queue::Queue;
pub use self::queue::WorkQueue;
pub use self::registry::FetchEvent;
pub use self::registry::FetchRequest;
pub use self::registry::ProducerConn;
pub use self::registry::Registry as ProducerRegistry;
pub use self::supervisor::Supervisor;
pub use self::work_unit::BrokerEndpoint;
pub use self::work_unit::FetchError;
pub use self::work_unit::FetchItem;
pub use self::work_unit::Message;
pub use self::work_unit::RespData;
pub use self::work_unit::Status;
pub use self::work_unit::WorkOutcome;
pub use self::work_unit::WorkUnit;
pub use self::worker::Delegate;

/// Attempts to register this crate's metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored, same as every other metrics-emitting
/// crate in this workspace.
pub fn register_metrics(logger: &Logger, registry: &MetricsRegistry) {
    self::metrics::register_metrics(logger, registry);
    fetchrelay_externals_kafka::register_metrics(logger, registry);
}
