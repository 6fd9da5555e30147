use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::Builder;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use failure::ResultExt;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;

use fetchrelay_service_healthcheck::HealthCheck;
use fetchrelay_service_healthcheck::HealthChecks;
use fetchrelay_service_healthcheck::HealthStatus;

use crate::config::Config;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::metrics::WORKER_RESTARTS;
use crate::queue::build_pool;
use crate::queue::WorkQueue;
use crate::registry::Registry;
use crate::work_unit::Message;
use crate::work_unit::WorkUnit;
use crate::worker::Delegate;
use crate::worker::Worker;

const CLAIM_TIMEOUT: Duration = Duration::from_secs(1);
const MONITOR_INTERVAL: Duration = Duration::from_millis(250);

struct RedisHealthChecker {
    queue: Arc<WorkQueue>,
}

impl HealthCheck for RedisHealthChecker {
    fn check(&self) -> HealthStatus {
        match self.queue.ping() {
            Ok(()) => HealthStatus::Healthy,
            Err(error) => HealthStatus::Failed(error.to_string()),
        }
    }
}

/// Owns the worker pool and the dispatcher thread, and coordinates shutdown (§4.5).
pub struct Supervisor {
    logger: Logger,
    running: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    worker_count: u16,
    shutdown_grace: Duration,
    pub downstream: Receiver<Vec<Message>>,
    pub healthchecks: HealthChecks,
}

impl Supervisor {
    /// Start the dispatcher thread, the worker pool, and the restart-monitor loop.
    ///
    /// `delegate` is invoked with every non-empty message batch a worker accepts; it must not
    /// block for long, since it runs inline on the worker thread that produced the batch.
    pub fn start(logger: Logger, config: Config, delegate: Arc<Delegate>) -> Result<Supervisor> {
        let pool = build_pool(&config.redis)?;
        let queue = Arc::new(WorkQueue::new(
            pool,
            config.queues.work_queue.clone(),
            config.queues.working_queue.clone(),
            config.queues.complete_queue.clone(),
            logger.new(slog::o!("component" => "work-queue")),
        ));
        let registry = Arc::new(Mutex::new(Registry::new(
            logger.new(slog::o!("component" => "producer-registry")),
            config.kafka.clone(),
        )));
        let (downstream_tx, downstream_rx) = bounded(config.downstream_channel_capacity);
        let (pool_tx, pool_rx) = bounded::<WorkUnit>(config.consumer_queue_limit);
        let running = Arc::new(AtomicBool::new(true));

        let mut healthchecks = HealthChecks::new();
        healthchecks.register(
            "redis-work-queue",
            RedisHealthChecker {
                queue: Arc::clone(&queue),
            },
        );

        let dispatcher = spawn_dispatcher(
            logger.new(slog::o!("component" => "dispatcher")),
            Arc::clone(&queue),
            pool_tx,
            Arc::clone(&running),
        )?;

        let fetch_timeout = Duration::from_millis(config.fetch_timeout);
        let workers = WorkerSpawner {
            logger: logger.clone(),
            queue,
            registry,
            downstream: downstream_tx,
            delegate,
            fetch_timeout,
            pool_rx,
            running: Arc::clone(&running),
        };
        let monitor = workers.spawn_monitor(config.consumer_threads)?;

        Ok(Supervisor {
            logger,
            running,
            dispatcher: Some(dispatcher),
            monitor: Some(monitor),
            worker_count: config.consumer_threads,
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            downstream: downstream_rx,
            healthchecks,
        })
    }

    /// Stop the worker pool (bounded by the configured grace period), then the dispatcher.
    pub fn stop(&mut self) {
        info!(self.logger, "Stopping consumer supervisor"; "workers" => self.worker_count);
        self.running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + self.shutdown_grace;
        if let Some(monitor) = self.monitor.take() {
            while !monitor.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(50));
            }
            if let Err(error) = monitor.join() {
                error!(self.logger, "Worker pool monitor thread panicked"; "error" => ?error);
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(error) = dispatcher.join() {
                error!(self.logger, "Dispatcher thread panicked"; "error" => ?error);
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.dispatcher.is_some() || self.monitor.is_some() {
            self.stop();
        }
    }
}

fn spawn_dispatcher(
    logger: Logger,
    queue: Arc<WorkQueue>,
    pool_tx: Sender<WorkUnit>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    Builder::new()
        .name("fetchrelay:dispatcher".into())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                match queue.claim(CLAIM_TIMEOUT) {
                    Ok(Some(unit)) => {
                        // A full pool queue is how downstream backpressure reaches the
                        // dispatcher (§5): this send is allowed to block.
                        if pool_tx.send(unit).is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(error) => {
                        warn!(logger, "Dispatcher failed to claim a work unit"; "error" => ?error);
                    }
                }
            }
        })
        .with_context(|_| ErrorKind::SpawnThread("dispatcher"))
        .map_err(Into::into)
}

struct WorkerSpawner {
    logger: Logger,
    queue: Arc<WorkQueue>,
    registry: Arc<Mutex<Registry>>,
    downstream: Sender<Vec<Message>>,
    delegate: Arc<Delegate>,
    fetch_timeout: Duration,
    pool_rx: Receiver<WorkUnit>,
    running: Arc<AtomicBool>,
}

impl WorkerSpawner {
    fn spawn_one(&self, index: u16) -> Result<JoinHandle<()>> {
        let logger = self.logger.new(slog::o!("worker" => index));
        let queue = Arc::clone(&self.queue);
        let registry = Arc::clone(&self.registry);
        let downstream = self.downstream.clone();
        let delegate = Arc::clone(&self.delegate);
        let fetch_timeout = self.fetch_timeout;
        let pool_rx = self.pool_rx.clone();
        let running = Arc::clone(&self.running);
        Builder::new()
            .name(format!("fetchrelay:worker:{}", index))
            .spawn(move || {
                let worker = Worker::new(queue, registry, downstream, delegate, fetch_timeout, logger);
                while running.load(Ordering::SeqCst) {
                    match pool_rx.recv_timeout(CLAIM_TIMEOUT) {
                        Ok(unit) => worker.run_once(unit),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .with_context(|_| ErrorKind::SpawnThread("worker"))
            .map_err(Into::into)
    }

    /// Spawn `count` worker threads and a monitor thread that restarts any that exit while the
    /// pool is still supposed to be running (the supervisor's `init`/`exec`/`fail` lifecycle from
    /// §4.5, expressed as plain `JoinHandle` supervision rather than a managed-thread framework).
    fn spawn_monitor(self, count: u16) -> Result<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(count as usize);
        for index in 0..count {
            handles.push(self.spawn_one(index)?);
        }
        let logger = self.logger.clone();
        let running = Arc::clone(&self.running);
        Builder::new()
            .name("fetchrelay:worker-pool-monitor".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    for (index, handle) in handles.iter_mut().enumerate() {
                        if handle.is_finished() {
                            if !running.load(Ordering::SeqCst) {
                                break;
                            }
                            warn!(logger, "Worker thread exited unexpectedly, restarting"; "worker" => index);
                            WORKER_RESTARTS.inc();
                            match self.spawn_one(index as u16) {
                                Ok(fresh) => *handle = fresh,
                                Err(error) => {
                                    error!(logger, "Failed to restart worker thread"; "error" => ?error, "worker" => index)
                                }
                            }
                        }
                    }
                    std::thread::sleep(MONITOR_INTERVAL);
                }
                for handle in handles {
                    let _ = handle.join();
                }
            })
            .with_context(|_| ErrorKind::SpawnThread("worker-pool-monitor"))
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::CLAIM_TIMEOUT;
    use std::time::Duration;

    #[test]
    fn claim_timeout_matches_the_documented_default() {
        assert_eq!(CLAIM_TIMEOUT, Duration::from_secs(1));
    }
}
