use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    context::AppContext,
    filter::filter,
    metrics,
    storage::StoreError,
    types::{Job, JobStatus, WorkType},
};

pub mod handlers;

use handlers::JobHandler;

const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Takes jobs of one work type off their queue and runs them one at a time.
pub struct WorkerRuntime {
    work_type: WorkType,
    handler: Arc<dyn JobHandler>,
    ctx: AppContext,
}

impl WorkerRuntime {
    pub fn new(work_type: WorkType, handler: Arc<dyn JobHandler>, ctx: AppContext) -> Self {
        Self {
            work_type,
            handler,
            ctx,
        }
    }

    pub fn work_type(&self) -> WorkType {
        self.work_type
    }

    /// Runs `replicas` loops over the same queue until cancelled.
    pub async fn run_replicas(
        self: Arc<Self>,
        replicas: usize,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        let tasks = (0..replicas.max(1)).map(|replica| {
            let runtime = self.clone();
            let token = cancellation_token.clone();
            tokio::spawn(async move { runtime.run(replica, token).await })
        });
        for result in futures::future::join_all(tasks).await {
            result?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(work_type = %self.work_type, replica = replica))]
    pub async fn run(&self, replica: usize, cancellation_token: CancellationToken) {
        info!("{} worker running", self.work_type);
        loop {
            match self.ctx.queues.dequeue(self.work_type, &cancellation_token).await {
                Ok(Some(job)) => {
                    let key = job.key();
                    if let Err(e) = self.process(job).await {
                        warn!("Couldn't process job {key}: {e:?}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Couldn't read {}: {e}", self.work_type.queue_name());
                    tokio::select! {
                        _ = tokio::time::sleep(STORE_ERROR_BACKOFF) => {}
                        _ = cancellation_token.cancelled() => break,
                    }
                }
            }
        }
        info!("{} worker stopped", self.work_type);
    }

    /// Runs a job claimed from the queue to a terminal status and returns it.
    #[instrument(skip_all, fields(job = %job.id))]
    pub async fn process(&self, job: Job) -> Result<JobStatus, StoreError> {
        let key = job.key();
        if job.status.is_terminal() {
            debug!("Job {key} is already {}, skipping", job.status);
            return Ok(job.status);
        }

        let job = match self.execute(job).await {
            Ok(results) => {
                let job = self
                    .ctx
                    .jobs
                    .update_status(key, JobStatus::Completed, Some(results))
                    .await?;
                metrics::JOBS_COMPLETED.inc();
                info!("{key} complete");
                job
            }
            Err(e) => {
                warn!("Job {key} failed: {e:?}");
                let job = self
                    .ctx
                    .jobs
                    .update_status(key, JobStatus::Failed, None)
                    .await?;
                metrics::JOBS_FAILED.inc();
                job
            }
        };
        Ok(job.status)
    }

    // Runs the handler in its own task so that a panic fails only this job.
    async fn execute(&self, job: Job) -> anyhow::Result<serde_json::Value> {
        let handler = self.handler.clone();
        let dataset = self.ctx.dataset.clone();
        let task = tokio::spawn(async move {
            let records = dataset.read_all().await?;
            let selection = filter(&records, &job.selector);
            handler.handle(&job, &selection).await
        });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow!("Job handler panicked")),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        context::tests::memory_context,
        types::{NewRecord, Record, Selector},
    };

    struct Count;

    #[async_trait]
    impl JobHandler for Count {
        async fn handle(&self, _job: &Job, selection: &[Record]) -> anyhow::Result<Value> {
            Ok(json!(selection.len()))
        }
    }

    struct Panics;

    #[async_trait]
    impl JobHandler for Panics {
        async fn handle(&self, _job: &Job, _selection: &[Record]) -> anyhow::Result<Value> {
            panic!("boom")
        }
    }

    struct Fails;

    #[async_trait]
    impl JobHandler for Fails {
        async fn handle(&self, _job: &Job, _selection: &[Record]) -> anyhow::Result<Value> {
            anyhow::bail!("bad input")
        }
    }

    async fn seeded_context() -> (tempfile::TempDir, AppContext) {
        let (dir, ctx) = memory_context().await;
        let records = (1770..1780).map(|year| NewRecord { year, spots: year - 1700 });
        ctx.dataset.replace(records.collect()).await.unwrap();
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_completes_with_results() {
        let (_dir, ctx) = seeded_context().await;
        let runtime = WorkerRuntime::new(WorkType::Data, Arc::new(Count), ctx.clone());
        let job = ctx
            .submit_job(WorkType::Data, Selector::range(Some(1772), Some(1775)).unwrap())
            .await
            .unwrap();
        let claimed = ctx.queues.try_dequeue(WorkType::Data).await.unwrap().unwrap();
        let key = claimed.key();
        assert_eq!(key, job.key());
        assert_eq!(claimed.status, JobStatus::Processing);

        assert_eq!(runtime.process(claimed).await.unwrap(), JobStatus::Completed);
        let stored = ctx.jobs.get_by_key(key).await.unwrap();
        assert_eq!(stored.results, Some(json!(4)));
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn test_failure_and_panic_mark_failed() {
        let (_dir, ctx) = seeded_context().await;
        let handlers: [Arc<dyn JobHandler>; 2] = [Arc::new(Fails), Arc::new(Panics)];
        for handler in handlers {
            let runtime = WorkerRuntime::new(WorkType::Stats, handler, ctx.clone());
            ctx.submit_job(WorkType::Stats, Selector::default())
                .await
                .unwrap();
            let job = ctx.queues.try_dequeue(WorkType::Stats).await.unwrap().unwrap();
            assert_eq!(runtime.process(job.clone()).await.unwrap(), JobStatus::Failed);
            let stored = ctx.jobs.get_by_key(job.key()).await.unwrap();
            assert_eq!(stored.status, JobStatus::Failed);
            assert_eq!(stored.results, None);
        }
    }

    #[tokio::test]
    async fn test_redelivered_job_is_skipped() {
        let (_dir, ctx) = seeded_context().await;
        let runtime = WorkerRuntime::new(WorkType::Data, Arc::new(Count), ctx.clone());
        let job = ctx
            .submit_job(WorkType::Data, Selector::default())
            .await
            .unwrap();
        let claimed = ctx.queues.try_dequeue(WorkType::Data).await.unwrap().unwrap();
        runtime.process(claimed).await.unwrap();
        let first = ctx.jobs.get_by_key(job.key()).await.unwrap();

        // A duplicate queue item hands the finished job out again
        ctx.queues.enqueue(job.key(), WorkType::Data).await.unwrap();
        let again = ctx.queues.try_dequeue(WorkType::Data).await.unwrap().unwrap();
        assert_eq!(again, first);
        assert_eq!(runtime.process(again).await.unwrap(), JobStatus::Completed);
        assert_eq!(ctx.jobs.get_by_key(job.key()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_run_loop_drains_queue_and_stops() {
        let (_dir, ctx) = seeded_context().await;
        let runtime = Arc::new(WorkerRuntime::new(
            WorkType::Data,
            Arc::new(Count),
            ctx.clone(),
        ));
        let token = CancellationToken::new();
        let workers = tokio::spawn(runtime.clone().run_replicas(2, token.clone()));

        let mut keys = Vec::new();
        for offset in 0..5 {
            let selector = Selector::window(Some(offset), None).unwrap();
            keys.push(ctx.submit_job(WorkType::Data, selector).await.unwrap().key());
        }
        for (offset, key) in keys.iter().enumerate() {
            let job = loop {
                let job = ctx.jobs.get_by_key(*key).await.unwrap();
                if job.status.is_terminal() {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.results, Some(json!(10 - offset)));
        }

        token.cancel();
        workers.await.unwrap().unwrap();
        assert_eq!(ctx.queues.depth(WorkType::Data).await.unwrap(), 0);
    }
}
