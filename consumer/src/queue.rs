use std::time::Duration;

use failure::Fail;
use failure::ResultExt;
use r2d2::Pool;
use r2d2_redis::redis::Commands;
use r2d2_redis::RedisConnectionManager;
use slog::debug;
use slog::warn;
use slog::Logger;

use crate::config::RedisConfig;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::metrics::QUEUE_CLAIM_ERRORS;
use crate::metrics::QUEUE_SETTLE_ERRORS;
use crate::metrics::WORK_UNITS_CLAIMED;
use crate::metrics::WORK_UNITS_SETTLED;
use crate::work_unit::RespData;
use crate::work_unit::Status;
use crate::work_unit::WorkOutcome;
use crate::work_unit::WorkUnit;

/// Build the pooled redis connection this queue protocol is layered on.
pub fn build_pool(config: &RedisConfig) -> Result<Pool<RedisConnectionManager>> {
    let manager = RedisConnectionManager::new(config.url().as_str())
        .with_context(|_| ErrorKind::RedisPool)?;
    Pool::builder()
        .max_size(config.max_active)
        .connection_timeout(Duration::from_millis(config.timeout))
        .build(manager)
        .with_context(|_| ErrorKind::RedisPool)
        .map_err(Error::from)
}

/// Settlement surface a `Worker` needs from a work queue.
///
/// Split out so worker cycle tests can run against `mock::MockQueue` instead of a live redis pool.
pub trait Queue: Send + Sync {
    fn settle(&self, unit: &WorkUnit, status: Status, offset_read: Option<i64>) -> Result<()>;
}

/// The three-list Redis state machine backing the work queue protocol (§4.3).
pub struct WorkQueue {
    pool: Pool<RedisConnectionManager>,
    work: String,
    working: String,
    complete: String,
    logger: Logger,
}

impl WorkQueue {
    pub fn new(
        pool: Pool<RedisConnectionManager>,
        work: String,
        working: String,
        complete: String,
        logger: Logger,
    ) -> WorkQueue {
        WorkQueue {
            pool,
            work,
            working,
            complete,
            logger,
        }
    }

    /// Publish a new work unit onto the `work` list.
    ///
    /// `WorkUnit` has no optional fields, so the "all required attributes present" constraint
    /// from the distilled spec is enforced structurally by the type rather than by a runtime
    /// check here.
    pub fn publish(&self, unit: &WorkUnit) -> Result<()> {
        let encoded = serde_json::to_vec(unit).with_context(|_| ErrorKind::Encode)?;
        let mut conn = self.pool.get().with_context(|_| ErrorKind::RedisOp("publish"))?;
        conn.lpush::<_, _, ()>(&self.work, encoded)
            .with_context(|_| ErrorKind::RedisOp("publish"))?;
        Ok(())
    }

    /// Check connectivity without touching any of the three lists.
    pub fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().with_context(|_| ErrorKind::RedisOp("ping"))?;
        r2d2_redis::redis::cmd("PING")
            .query::<String>(&mut *conn)
            .with_context(|_| ErrorKind::RedisOp("ping"))?;
        Ok(())
    }

    /// Atomically claim one work unit: `BRPOPLPUSH work working <timeout>`.
    ///
    /// A blocking timeout with nothing to claim is not an error: it returns `Ok(None)` so callers
    /// can retry without special-casing a distinct "timed out" variant. Redis connectivity
    /// errors are folded into the same `Ok(None)` path (after logging) so the dispatcher loop
    /// never needs to distinguish "nothing to do" from "redis hiccuped" at the call site.
    pub fn claim(&self, timeout: Duration) -> Result<Option<WorkUnit>> {
        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(err) => {
                QUEUE_CLAIM_ERRORS.inc();
                warn!(self.logger, "Failed to get redis connection for claim"; "error" => %err);
                return Ok(None);
            }
        };
        let timeout_secs = timeout.as_secs().max(1);
        let raw: Option<Vec<u8>> = match conn.brpoplpush(&self.work, &self.working, timeout_secs as usize) {
            Ok(raw) => raw,
            Err(err) => {
                QUEUE_CLAIM_ERRORS.inc();
                warn!(self.logger, "Redis claim operation failed"; "error" => %err);
                return Ok(None);
            }
        };
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let unit: WorkUnit = serde_json::from_slice(&bytes).with_context(|_| ErrorKind::Decode)?;
                WORK_UNITS_CLAIMED.inc();
                debug!(self.logger, "Claimed work unit"; "topic" => &unit.topic, "partition" => unit.partition, "offset" => unit.offset);
                Ok(Some(unit))
            }
        }
    }

    /// Settle a claimed unit: append its outcome to `complete` and remove it from `working`, in
    /// one redis transaction. If the transaction fails the unit remains on `working`; recovery of
    /// orphaned `working` entries is an external reconciler's job, not this protocol's.
    pub fn settle(&self, unit: &WorkUnit, status: Status, offset_read: Option<i64>) -> Result<()> {
        let outcome = WorkOutcome {
            unit: unit.clone(),
            status,
            resp_data: offset_read.map(|offset_read| RespData { offset_read }),
        };
        let outcome_encoded = serde_json::to_vec(&outcome).with_context(|_| ErrorKind::Encode)?;
        let unit_encoded = serde_json::to_vec(unit).with_context(|_| ErrorKind::Encode)?;

        let mut conn = self.pool.get().with_context(|_| ErrorKind::RedisOp("settle"))?;
        let result: std::result::Result<(), r2d2_redis::redis::RedisError> =
            r2d2_redis::redis::pipe()
                .atomic()
                .lpush(&self.complete, outcome_encoded)
                .lrem(&self.working, -1, unit_encoded)
                .query(&mut *conn)
                .map(|_: (i64, i64)| ());

        match result {
            Ok(()) => {
                WORK_UNITS_SETTLED
                    .with_label_values(&[status_label(status)])
                    .inc();
                Ok(())
            }
            Err(err) => {
                QUEUE_SETTLE_ERRORS.inc();
                Err(Error::from(err.context(ErrorKind::RedisOp("settle"))))
            }
        }
    }
}

impl Queue for WorkQueue {
    fn settle(&self, unit: &WorkUnit, status: Status, offset_read: Option<i64>) -> Result<()> {
        WorkQueue::settle(self, unit, status, offset_read)
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Ok => "ok",
        Status::Fail => "fail",
    }
}

#[cfg(test)]
mod tests {
    use super::status_label;
    use crate::work_unit::Status;

    #[test]
    fn status_label_matches_status() {
        assert_eq!(status_label(Status::Ok), "ok");
        assert_eq!(status_label(Status::Fail), "fail");
    }
}
