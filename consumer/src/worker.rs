use std::panic;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::after;
use crossbeam_channel::select;
use crossbeam_channel::Sender;
use slog::debug;
use slog::error;
use slog::warn;
use slog::Logger;

use crate::error::Result;
use crate::metrics::FETCH_TIMEOUTS;
use crate::queue::Queue;
use crate::reader;
use crate::registry::ConnectionSource;
use crate::registry::FetchEvent;
use crate::registry::FetchRequest;
use crate::work_unit::Message;
use crate::work_unit::Status;
use crate::work_unit::WorkUnit;

/// Downstream delegate invoked with every non-empty message batch a worker accepts.
///
/// Mirrors the distilled spec's `f(state, status, respData)`: this crate only ever calls it with
/// `messages` non-empty, since an empty batch carries nothing to deliver.
pub type Delegate = dyn Fn(&WorkUnit, &[Message]) + Send + Sync;

/// Runs the fetch/parse/commit cycle described in §4.4, one work unit at a time.
///
/// Generic over the queue and registry surfaces so tests can swap in `mock::MockQueue` /
/// `mock::MockRegistry`; the supervisor always wires this up with the real `WorkQueue` and
/// `Registry`.
pub struct Worker<Q: Queue, R: ConnectionSource> {
    queue: Arc<Q>,
    registry: Arc<Mutex<R>>,
    downstream: Sender<Vec<Message>>,
    delegate: Arc<Delegate>,
    fetch_timeout: Duration,
    logger: Logger,
}

impl<Q: Queue, R: ConnectionSource> Worker<Q, R> {
    pub fn new(
        queue: Arc<Q>,
        registry: Arc<Mutex<R>>,
        downstream: Sender<Vec<Message>>,
        delegate: Arc<Delegate>,
        fetch_timeout: Duration,
        logger: Logger,
    ) -> Worker<Q, R> {
        Worker {
            queue,
            registry,
            downstream,
            delegate,
            fetch_timeout,
            logger,
        }
    }

    /// Pull one work unit off the pool queue (blocking) and run it to completion.
    ///
    /// Never returns an `Err`: every failure mode described in §4.4/§7 is folded into a `fail`
    /// settle and logged, so the worker thread's outer loop never has to special-case a poisoned
    /// cycle.
    pub fn run_once(&self, unit: WorkUnit) {
        if let Err(error) = self.cycle(&unit) {
            error!(self.logger, "Worker cycle failed, settling unit as failed"; "error" => ?error, "topic" => &unit.topic, "partition" => unit.partition);
            if let Err(settle_error) = self.queue.settle(&unit, Status::Fail, None) {
                error!(self.logger, "Failed to settle unit after cycle error"; "error" => ?settle_error);
            }
        }
    }

    fn cycle(&self, unit: &WorkUnit) -> Result<()> {
        let conn = {
            let mut registry = self
                .registry
                .lock()
                .expect("producer registry mutex poisoned");
            match registry.get_or_create(&unit.producer) {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(self.logger, "Failed to resolve producer connection"; "error" => ?error, "broker" => format!("{}:{}", unit.producer.host, unit.producer.port));
                    return self.queue.settle(unit, Status::Fail, None);
                }
            }
        };

        if let Err(error) = conn.send_fetch(FetchRequest {
            topic: unit.topic.clone(),
            partition: unit.partition,
            offset: unit.offset,
            len: unit.len,
        }) {
            warn!(self.logger, "Failed to dispatch fetch request"; "error" => ?error);
            return self.queue.settle(unit, Status::Fail, None);
        }

        // Re-enter the wait once per `Reconnected` sentinel, bounded by the same fetch-timeout
        // budget (rewrite of the source's unbounded recursive recovery, see design notes).
        let deadline = std::time::Instant::now() + self.fetch_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let timeout_ch = after(remaining);
            let (status, messages) = select! {
                recv(conn.read_rx) -> event => match event {
                    Ok(FetchEvent::Reconnected) => {
                        debug!(self.logger, "Producer reconnected, retrying wait");
                        if std::time::Instant::now() >= deadline {
                            FETCH_TIMEOUTS.inc();
                            (Status::Fail, Vec::new())
                        } else {
                            continue;
                        }
                    }
                    Ok(FetchEvent::Poison) => (Status::Fail, Vec::new()),
                    Ok(FetchEvent::Payload(items)) => {
                        let (messages, errors) = reader::fold(unit, items);
                        for error in errors {
                            debug!(self.logger, "Fetch response carried an error item"; "code" => error.code, "description" => %error.description);
                        }
                        (Status::Ok, messages)
                    }
                    Err(_) => (Status::Fail, Vec::new()),
                },
                recv(conn.error_rx) -> event => {
                    if let Ok(error) = event {
                        warn!(self.logger, "Producer error channel delivered an error"; "code" => error.code, "description" => %error.description);
                    }
                    (Status::Fail, Vec::new())
                },
                recv(timeout_ch) -> _ => {
                    FETCH_TIMEOUTS.inc();
                    (Status::Fail, Vec::new())
                },
            };
            break self.finish(unit, status, messages);
        }
    }

    fn finish(&self, unit: &WorkUnit, status: Status, messages: Vec<Message>) -> Result<()> {
        let decision = decide_outcome(status, messages, &self.delegate, unit, &self.logger);
        if let Some(ref batch) = decision.downstream_batch {
            if self.downstream.send(batch.clone()).is_err() {
                warn!(self.logger, "Downstream channel is closed, dropping message batch");
            }
        }
        self.queue.settle(unit, decision.status, decision.offset_read)
    }
}

/// Result of classifying one fetch outcome against the downstream delegate.
///
/// Split out from `Worker::finish` so the delegate-invocation and offset-summary logic (step 6-7
/// of §4.4) can be exercised without a live Redis-backed `WorkQueue`.
struct Outcome {
    status: Status,
    offset_read: Option<i64>,
    downstream_batch: Option<Vec<Message>>,
}

fn decide_outcome(
    status: Status,
    messages: Vec<Message>,
    delegate: &Arc<Delegate>,
    unit: &WorkUnit,
    logger: &Logger,
) -> Outcome {
    if messages.is_empty() {
        return Outcome {
            status,
            offset_read: None,
            downstream_batch: None,
        };
    }

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| delegate(unit, &messages)));
    if result.is_err() {
        warn!(logger, "Downstream delegate panicked, settling unit as failed");
        return Outcome {
            status: Status::Fail,
            offset_read: None,
            downstream_batch: None,
        };
    }

    if status != Status::Ok {
        return Outcome {
            status,
            offset_read: None,
            downstream_batch: None,
        };
    }

    let offset_read = messages.iter().map(|m| m.offset).max();
    Outcome {
        status,
        offset_read,
        downstream_batch: Some(messages),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use slog::Discard;
    use slog::Logger;

    use super::decide_outcome;
    use crate::work_unit::BrokerEndpoint;
    use crate::work_unit::Message;
    use crate::work_unit::Status;
    use crate::work_unit::WorkUnit;

    fn logger() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    fn unit() -> WorkUnit {
        WorkUnit {
            producer: BrokerEndpoint::new("b1", 9092),
            topic: "t".into(),
            partition: 0,
            offset: 0,
            len: 10,
        }
    }

    fn message(offset: i64) -> Message {
        Message {
            topic: "t".into(),
            partition: 0,
            offset,
            bytes: vec![],
        }
    }

    #[test]
    fn s1_ok_with_messages_sends_downstream_and_reports_max_offset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = Arc::clone(&calls);
        let delegate: Arc<super::Delegate> = Arc::new(move |_unit, _messages| {
            calls_inner.fetch_add(1, Ordering::SeqCst);
        });
        let messages = vec![message(0), message(1), message(2)];
        let outcome = decide_outcome(Status::Ok, messages, &delegate, &unit(), &logger());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.status, Status::Ok);
        assert_eq!(outcome.offset_read, Some(2));
        assert_eq!(outcome.downstream_batch.unwrap().len(), 3);
    }

    #[test]
    fn boundary_empty_messages_never_invoke_delegate_or_send_downstream() {
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| panic!("must not be called"));
        let outcome = decide_outcome(Status::Ok, Vec::new(), &delegate, &unit(), &logger());
        assert!(outcome.downstream_batch.is_none());
        assert_eq!(outcome.offset_read, None);
    }

    #[test]
    fn s5_delegate_panic_is_caught_and_fails_without_downstream_send() {
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| panic!("boom"));
        let messages = vec![message(4)];
        let outcome = decide_outcome(Status::Ok, messages, &delegate, &unit(), &logger());
        assert_eq!(outcome.status, Status::Fail);
        assert!(outcome.downstream_batch.is_none());
    }

    #[test]
    fn fail_status_with_messages_does_not_send_downstream() {
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| {});
        let messages = vec![message(4)];
        let outcome = decide_outcome(Status::Fail, messages, &delegate, &unit(), &logger());
        assert_eq!(outcome.status, Status::Fail);
        assert!(outcome.downstream_batch.is_none());
        assert_eq!(outcome.offset_read, None);
    }

    #[test]
    fn s1_full_cycle_against_mocked_queue_and_registry() {
        use crate::mock::MockQueue;
        use crate::mock::MockRegistry;
        use crate::registry::FetchEvent;
        use crate::work_unit::FetchItem;
        use crossbeam_channel::bounded;

        let mut mock_registry = MockRegistry::new();
        let unit = unit();
        let (_request_rx, read_tx, _error_tx) = mock_registry.wire(unit.producer.clone());
        read_tx
            .send(FetchEvent::Payload(vec![FetchItem::Message(message(0))]))
            .expect("send should succeed");

        let queue = Arc::new(MockQueue::new());
        let registry = Arc::new(Mutex::new(mock_registry));
        let (downstream_tx, downstream_rx) = bounded(1);
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| {});

        let worker = super::Worker::new(
            Arc::clone(&queue),
            registry,
            downstream_tx,
            delegate,
            Duration::from_secs(1),
            logger(),
        );
        worker.run_once(unit.clone());

        let delivered = downstream_rx.try_recv().expect("a batch should have been forwarded");
        assert_eq!(delivered.len(), 1);

        let settled = queue.settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, Status::Ok);
        assert_eq!(settled[0].offset_read, Some(0));
    }

    #[test]
    fn unresolvable_producer_settles_as_fail_without_downstream_send() {
        use crate::mock::MockQueue;
        use crate::mock::MockRegistry;
        use crossbeam_channel::bounded;

        let unit = unit();
        let queue = Arc::new(MockQueue::new());
        let registry = Arc::new(Mutex::new(MockRegistry::new()));
        let (downstream_tx, downstream_rx) = bounded(1);
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| panic!("must not be called"));

        let worker = super::Worker::new(queue.clone(), registry, downstream_tx, delegate, Duration::from_secs(1), logger());
        worker.run_once(unit);

        assert!(downstream_rx.try_recv().is_err());
        let settled = queue.settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, Status::Fail);
    }

    #[test]
    fn s3_fetch_timeout_settles_as_fail_with_no_resp_data() {
        use crate::mock::MockQueue;
        use crate::mock::MockRegistry;
        use crossbeam_channel::bounded;

        let mut mock_registry = MockRegistry::new();
        let unit = unit();
        // Wired but nothing is ever sent on read_rx/error_rx: the worker must hit its own
        // fetch-timeout deadline rather than block forever.
        mock_registry.wire(unit.producer.clone());

        let queue = Arc::new(MockQueue::new());
        let registry = Arc::new(Mutex::new(mock_registry));
        let (downstream_tx, downstream_rx) = bounded(1);
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| panic!("must not be called"));

        let worker = super::Worker::new(
            queue.clone(),
            registry,
            downstream_tx,
            delegate,
            Duration::from_millis(50),
            logger(),
        );
        worker.run_once(unit);

        assert!(downstream_rx.try_recv().is_err());
        let settled = queue.settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, Status::Fail);
        assert_eq!(settled[0].offset_read, None);
    }

    #[test]
    fn s4_reconnect_sentinel_then_success_reports_delivered_max_offset() {
        use crate::mock::MockQueue;
        use crate::mock::MockRegistry;
        use crate::registry::FetchEvent;
        use crate::work_unit::FetchItem;
        use crossbeam_channel::bounded;
        use std::thread;

        let mut mock_registry = MockRegistry::new();
        let unit = unit();
        let (_request_rx, read_tx, _error_tx) = mock_registry.wire(unit.producer.clone());

        read_tx.send(FetchEvent::Reconnected).expect("send should succeed");
        let delayed_tx = read_tx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = delayed_tx.send(FetchEvent::Payload(vec![FetchItem::Message(message(5))]));
        });

        let queue = Arc::new(MockQueue::new());
        let registry = Arc::new(Mutex::new(mock_registry));
        let (downstream_tx, downstream_rx) = bounded(1);
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| {});

        let worker = super::Worker::new(
            queue.clone(),
            registry,
            downstream_tx,
            delegate,
            Duration::from_secs(1),
            logger(),
        );
        worker.run_once(unit);

        let delivered = downstream_rx.try_recv().expect("a batch should have been forwarded");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].offset, 5);

        let settled = queue.settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, Status::Ok);
        assert_eq!(settled[0].offset_read, Some(5));
    }

    #[test]
    fn poison_sentinel_settles_as_fail() {
        use crate::mock::MockQueue;
        use crate::mock::MockRegistry;
        use crate::registry::FetchEvent;
        use crossbeam_channel::bounded;

        let mut mock_registry = MockRegistry::new();
        let unit = unit();
        let (_request_rx, read_tx, _error_tx) = mock_registry.wire(unit.producer.clone());
        read_tx.send(FetchEvent::Poison).expect("send should succeed");

        let queue = Arc::new(MockQueue::new());
        let registry = Arc::new(Mutex::new(mock_registry));
        let (downstream_tx, downstream_rx) = bounded(1);
        let delegate: Arc<super::Delegate> = Arc::new(|_, _| panic!("must not be called"));

        let worker = super::Worker::new(queue.clone(), registry, downstream_tx, delegate, Duration::from_secs(1), logger());
        worker.run_once(unit);

        assert!(downstream_rx.try_recv().is_err());
        let settled = queue.settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, Status::Fail);
    }
}
