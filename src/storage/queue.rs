use std::time::Duration;

use tokio::sync::Notify;
use tokio_rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{jobs, StoreError};
use crate::types::{Job, JobKey, JobStatus, WorkType};

/// Three disjoint FIFO queues of job keys, one per work type, stored in the
/// shared database so that queued jobs survive a restart.
///
/// Waiting workers in this process are woken on enqueue; workers in other
/// processes notice new items on the next poll.
pub struct QueueDispatcher {
    db: Connection,
    poll_interval: Duration,
    data: Notify,
    stats: Notify,
    graph: Notify,
}

impl QueueDispatcher {
    pub fn new(db: Connection, poll_interval: Duration) -> Self {
        Self {
            db,
            poll_interval,
            data: Notify::new(),
            stats: Notify::new(),
            graph: Notify::new(),
        }
    }

    fn notifier(&self, work_type: WorkType) -> &Notify {
        match work_type {
            WorkType::Data => &self.data,
            WorkType::Stats => &self.stats,
            WorkType::Graph => &self.graph,
        }
    }

    #[instrument(skip(self), err)]
    pub async fn enqueue(&self, key: JobKey, work_type: WorkType) -> Result<(), StoreError> {
        let queue = work_type.queue_name();
        let key = key.to_string();
        self.db
            .call(move |db| {
                db.prepare_cached("INSERT INTO queue_items(queue, job_key) VALUES(?1, ?2)")?
                    .execute([queue, key.as_str()])?;
                Ok(())
            })
            .await?;
        self.notifier(work_type).notify_one();
        Ok(())
    }

    /// Takes the oldest item of the queue, if any, and marks its job
    /// `Processing` in the same transaction. Each item is handed out to exactly
    /// one caller. A job that is already terminal is returned unchanged.
    pub async fn try_dequeue(&self, work_type: WorkType) -> Result<Option<Job>, StoreError> {
        let queue = work_type.queue_name();
        let claimed = self
            .db
            .call(move |db| {
                let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let item = tx
                    .query_row(
                        "SELECT seq, job_key FROM queue_items WHERE queue = ?1 ORDER BY seq LIMIT 1",
                        [queue],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?;
                let Some((seq, raw)) = item else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM queue_items WHERE seq = ?1", [seq])?;
                let loaded = jobs::modify_in(&tx, &raw, |job| {
                    if job.status.is_terminal() {
                        return false;
                    }
                    job.apply_update(JobStatus::Processing, None);
                    true
                })?;
                tx.commit()?;
                Ok(Some((raw, loaded)))
            })
            .await?;
        let Some((raw, loaded)) = claimed else {
            return Ok(None);
        };
        let key = JobKey::parse(&raw)
            .ok_or_else(|| StoreError::Corrupt(format!("{queue}: invalid job key '{raw}'")))?;
        loaded.into_job(&key).map(Some)
    }

    /// Waits until an item is available and takes it. Returns `None` if the
    /// token is cancelled first; an item is never lost to cancellation.
    pub async fn dequeue(
        &self,
        work_type: WorkType,
        cancellation_token: &CancellationToken,
    ) -> Result<Option<Job>, StoreError> {
        let notify = self.notifier(work_type);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue(work_type).await? {
                debug!("Dequeued {} from {}", job.key(), work_type.queue_name());
                return Ok(Some(job));
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancellation_token.cancelled() => return Ok(None),
            }
        }
    }

    pub async fn depth(&self, work_type: WorkType) -> Result<usize, StoreError> {
        let queue = work_type.queue_name();
        let count = self
            .db
            .call(move |db| {
                let count = db.query_row(
                    "SELECT COUNT(*) FROM queue_items WHERE queue = ?1",
                    [queue],
                    |row| row.get::<_, i64>(0),
                )?;
                Ok(count)
            })
            .await?;
        usize::try_from(count).map_err(|_| {
            warn!("Negative queue depth for {queue}: {count}");
            StoreError::Corrupt(format!("{queue}: invalid depth {count}"))
        })
    }
}
