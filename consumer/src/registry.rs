use std::collections::HashMap;
use std::sync::Arc;
use std::thread::Builder;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use failure::ResultExt;
use rdkafka::config::ClientConfig;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::BaseConsumer;
use rdkafka::consumer::Consumer;
use rdkafka::message::Message as RdMessage;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use slog::debug;
use slog::warn;
use slog::Logger;

use fetchrelay_externals_kafka::ClientStatsContext;
use fetchrelay_externals_kafka::CommonConfig as KafkaConfig;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::metrics::PRODUCER_CONNECTIONS_CREATED;
use crate::metrics::PRODUCER_CONNECTION_ERRORS;
use crate::work_unit::BrokerEndpoint;
use crate::work_unit::FetchError;
use crate::work_unit::FetchItem;
use crate::work_unit::Message;

type StatsConsumer = BaseConsumer<ClientStatsContext>;

/// The bounded duration a single poll slice inside the connection thread is allowed to block
/// for, before the thread re-checks for shutdown / decides a batch is complete.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// A request to fetch `len` messages from `(topic, partition)` starting at `offset`, dispatched
/// to one broker's connection thread.
pub struct FetchRequest {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub len: i64,
}

/// Event surfaced on a `ProducerConn`'s `read_rx`.
///
/// Mirrors the source fetch client's dynamically-typed sentinel/payload channel (§9): callers
/// classify by variant instead of runtime type.
pub enum FetchEvent {
    /// The connection reconnected; the worker should keep waiting, not resend the request.
    Reconnected,
    /// The connection is permanently unusable; settle the current unit as failed.
    Poison,
    /// A batch of decoded fetch items, possibly empty.
    Payload(Vec<FetchItem>),
}

/// A live fetch connection to one broker, with its background I/O thread.
pub struct ProducerConn {
    pub broker: BrokerEndpoint,
    request_tx: Sender<FetchRequest>,
    pub read_rx: Receiver<FetchEvent>,
    pub error_rx: Receiver<FetchError>,
}

impl ProducerConn {
    /// Dispatch a fetch request. Non-blocking: the connection's background thread performs the
    /// actual assign+poll cycle and reports back on `read_rx`/`error_rx`.
    pub fn send_fetch(&self, request: FetchRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| Error::from(ErrorKind::KafkaFetch(self.broker.host.clone(), self.broker.port)))
    }

    /// Assemble a connection around already-created channels, for use by the `mock` module.
    pub fn from_channels(
        broker: BrokerEndpoint,
        request_tx: Sender<FetchRequest>,
        read_rx: Receiver<FetchEvent>,
        error_rx: Receiver<FetchError>,
    ) -> ProducerConn {
        ProducerConn {
            broker,
            request_tx,
            read_rx,
            error_rx,
        }
    }
}

fn client_config(kafka: &KafkaConfig, broker: &BrokerEndpoint, client_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", format!("{}:{}", broker.host, broker.port))
        .set("client.id", client_id)
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .set("group.id", "fetchrelay-consumer")
        .set("heartbeat.interval.ms", kafka.heartbeat.to_string())
        .set("metadata.request.timeout.ms", kafka.timeouts.metadata.to_string())
        .set("session.timeout.ms", kafka.timeouts.session.to_string())
        .set("socket.timeout.ms", kafka.timeouts.socket.to_string())
        .set_log_level(RDKafkaLogLevel::Debug);
    config
}

fn poll_batch(consumer: &StatsConsumer, request: &FetchRequest, logger: &Logger) -> FetchEvent {
    let mut items = Vec::new();
    let deadline = Instant::now() + POLL_SLICE * 4;
    while (items.len() as i64) < request.len && Instant::now() < deadline {
        match consumer.poll(POLL_SLICE) {
            None => {
                if !items.is_empty() {
                    break;
                }
            }
            Some(Ok(borrowed)) => {
                let payload = borrowed.payload().map(|bytes| bytes.to_vec()).unwrap_or_default();
                items.push(FetchItem::Message(Message {
                    topic: borrowed.topic().to_string(),
                    partition: borrowed.partition(),
                    offset: borrowed.offset(),
                    bytes: payload,
                }));
            }
            Some(Err(err)) => {
                debug!(logger, "Fetch poll returned an error item"; "error" => ?err);
                let code = err.rdkafka_error_code().map(i32::from).unwrap_or(-1);
                items.push(FetchItem::Error(FetchError::new(code, err.to_string())));
            }
        }
    }
    FetchEvent::Payload(items)
}

fn connection_loop(
    consumer: StatsConsumer,
    request_rx: Receiver<FetchRequest>,
    read_tx: Sender<FetchEvent>,
    error_tx: Sender<FetchError>,
    logger: Logger,
) {
    while let Ok(request) = request_rx.recv() {
        let mut partitions = TopicPartitionList::new();
        if let Err(err) = partitions.add_partition_offset(&request.topic, request.partition, Offset::Offset(request.offset)) {
            let _ = error_tx.send(FetchError::new(-1, err.to_string()));
            continue;
        }
        if let Err(err) = consumer.assign(&partitions) {
            warn!(logger, "Failed to assign partition for fetch, reconnecting"; "error" => ?err);
            let _ = read_tx.send(FetchEvent::Reconnected);
            continue;
        }
        let event = poll_batch(&consumer, &request, &logger);
        if read_tx.send(event).is_err() {
            break;
        }
    }
    debug!(logger, "Producer connection thread exiting");
}

/// Connection resolution surface a `Worker` needs from a producer registry.
///
/// Split out so worker cycle tests can run against `mock::MockRegistry` instead of spawning real
/// `rdkafka` connection threads.
pub trait ConnectionSource: Send + Sync {
    fn get_or_create(&mut self, broker: &BrokerEndpoint) -> Result<Arc<ProducerConn>>;
}

impl ConnectionSource for Registry {
    fn get_or_create(&mut self, broker: &BrokerEndpoint) -> Result<Arc<ProducerConn>> {
        Registry::get_or_create(self, broker)
    }
}

/// Lazily creates and caches one Kafka fetch connection per broker endpoint.
///
/// Shared as `Arc<Mutex<Registry>>` across the worker pool so Invariant 4 (at most one connection
/// per broker) holds exactly rather than approximately; see the design notes for why this is
/// preferred over a per-worker registry.
pub struct Registry {
    logger: Logger,
    kafka: KafkaConfig,
    conns: HashMap<BrokerEndpoint, Arc<ProducerConn>>,
}

impl Registry {
    pub fn new(logger: Logger, kafka: KafkaConfig) -> Registry {
        Registry {
            logger,
            kafka,
            conns: HashMap::new(),
        }
    }

    /// Return the cached connection for `broker`, creating one on first use.
    pub fn get_or_create(&mut self, broker: &BrokerEndpoint) -> Result<Arc<ProducerConn>> {
        if let Some(conn) = self.conns.get(broker) {
            return Ok(Arc::clone(conn));
        }
        let conn = self.create(broker)?;
        self.conns.insert(broker.clone(), Arc::clone(&conn));
        Ok(conn)
    }

    fn create(&self, broker: &BrokerEndpoint) -> Result<Arc<ProducerConn>> {
        let client_id = format!("fetchrelay-consumer-{}:{}", broker.host, broker.port);
        let config = client_config(&self.kafka, broker, &client_id);
        let context = ClientStatsContext::new(self.logger.clone());
        let consumer: StatsConsumer = config.create_with_context(context).with_context(|_| {
            PRODUCER_CONNECTION_ERRORS.inc();
            ErrorKind::KafkaConnect(broker.host.clone(), broker.port)
        })?;

        let (request_tx, request_rx) = bounded(16);
        let (read_tx, read_rx) = bounded(16);
        let (error_tx, error_rx) = bounded(16);
        let logger = self.logger.new(slog::o!("broker" => format!("{}:{}", broker.host, broker.port)));
        Builder::new()
            .name(format!("fetchrelay:producer:{}:{}", broker.host, broker.port))
            .spawn(move || connection_loop(consumer, request_rx, read_tx, error_tx, logger))
            .with_context(|_| ErrorKind::SpawnThread("producer connection"))?;

        PRODUCER_CONNECTIONS_CREATED.inc();
        Ok(Arc::new(ProducerConn {
            broker: broker.clone(),
            request_tx,
            read_rx,
            error_rx,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::work_unit::BrokerEndpoint;
    use fetchrelay_externals_kafka::CommonConfig as KafkaConfig;
    use slog::Discard;
    use slog::Logger;

    fn kafka_config() -> KafkaConfig {
        KafkaConfig {
            ack_level: Default::default(),
            brokers: "localhost:9092".into(),
            heartbeat: 3000,
            timeouts: Default::default(),
        }
    }

    #[test]
    fn get_or_create_caches_connections_per_broker() {
        let logger = Logger::root(Discard, slog::o!());
        let mut registry = Registry::new(logger, kafka_config());
        let broker = BrokerEndpoint::new("b1", 9092);
        let first = registry.get_or_create(&broker).expect("connection should be created");
        let second = registry.get_or_create(&broker).expect("connection should be cached");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn distinct_brokers_get_distinct_connections() {
        let logger = Logger::root(Discard, slog::o!());
        let mut registry = Registry::new(logger, kafka_config());
        let b1 = registry
            .get_or_create(&BrokerEndpoint::new("b1", 9092))
            .expect("connection should be created");
        let b2 = registry
            .get_or_create(&BrokerEndpoint::new("b2", 9092))
            .expect("connection should be created");
        assert!(!std::sync::Arc::ptr_eq(&b1, &b2));
    }
}
