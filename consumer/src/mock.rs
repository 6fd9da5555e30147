//! Test doubles for the work queue and producer registry.
//!
//! Mirrors `tasks/src/worker/backend/mock.rs`'s approach of a plain (non-`cfg(test)`) mock module:
//! a `Worker` can be driven end to end against these instead of a live redis pool or a spawned
//! `rdkafka` connection thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::queue::Queue;
use crate::registry::ConnectionSource;
use crate::registry::FetchEvent;
use crate::registry::FetchRequest;
use crate::registry::ProducerConn;
use crate::work_unit::BrokerEndpoint;
use crate::work_unit::FetchError;
use crate::work_unit::Status;
use crate::work_unit::WorkUnit;

/// One recorded `settle` call.
#[derive(Clone, Debug, PartialEq)]
pub struct SettledUnit {
    pub unit: WorkUnit,
    pub status: Status,
    pub offset_read: Option<i64>,
}

/// A `Queue` that records every settle call instead of touching redis.
#[derive(Default)]
pub struct MockQueue {
    settled: Mutex<Vec<SettledUnit>>,
}

impl MockQueue {
    pub fn new() -> MockQueue {
        MockQueue::default()
    }

    pub fn settled(&self) -> Vec<SettledUnit> {
        self.settled.lock().expect("mock queue lock poisoned").clone()
    }
}

impl Queue for MockQueue {
    fn settle(&self, unit: &WorkUnit, status: Status, offset_read: Option<i64>) -> Result<()> {
        self.settled
            .lock()
            .expect("mock queue lock poisoned")
            .push(SettledUnit {
                unit: unit.clone(),
                status,
                offset_read,
            });
        Ok(())
    }
}

/// A `ConnectionSource` that hands out connections built around channels the test controls
/// directly, rather than spawning real `rdkafka` connection threads.
#[derive(Default)]
pub struct MockRegistry {
    conns: HashMap<BrokerEndpoint, Arc<ProducerConn>>,
    fail_for: Option<BrokerEndpoint>,
}

impl MockRegistry {
    pub fn new() -> MockRegistry {
        MockRegistry::default()
    }

    /// Wire up a fetch connection for `broker`; returns the handles used to feed it from a test.
    pub fn wire(
        &mut self,
        broker: BrokerEndpoint,
    ) -> (Receiver<FetchRequest>, Sender<FetchEvent>, Sender<FetchError>) {
        let (request_tx, request_rx) = unbounded();
        let (read_tx, read_rx) = unbounded();
        let (error_tx, error_rx) = unbounded();
        let conn = Arc::new(ProducerConn::from_channels(broker.clone(), request_tx, read_rx, error_rx));
        self.conns.insert(broker, conn);
        (request_rx, read_tx, error_tx)
    }

    /// Make the next `get_or_create` call for `broker` fail, simulating a connect error.
    pub fn fail_next(&mut self, broker: BrokerEndpoint) {
        self.fail_for = Some(broker);
    }
}

impl ConnectionSource for MockRegistry {
    fn get_or_create(&mut self, broker: &BrokerEndpoint) -> Result<Arc<ProducerConn>> {
        if self.fail_for.as_ref() == Some(broker) {
            self.fail_for = None;
            return Err(Error::from(ErrorKind::KafkaConnect(broker.host.clone(), broker.port)));
        }
        self.conns
            .get(broker)
            .cloned()
            .ok_or_else(|| Error::from(ErrorKind::KafkaConnect(broker.host.clone(), broker.port)))
    }
}
