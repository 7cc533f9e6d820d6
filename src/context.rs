use std::{sync::Arc, time::Duration};

use camino::Utf8PathBuf as PathBuf;
use tracing::info;

use crate::{
    metrics,
    storage::{open_database, DatasetStore, JobStore, QueueDispatcher, RetryPolicy, StoreError},
    types::{Job, Selector, WorkType},
};

pub struct StoreConfig {
    pub database: PathBuf,
    pub dataset_file: PathBuf,
    pub queue_poll_interval: Duration,
}

/// Stores shared by the HTTP layer and the worker runtimes of one process.
#[derive(Clone)]
pub struct AppContext {
    pub dataset: Arc<DatasetStore>,
    pub jobs: Arc<JobStore>,
    pub queues: Arc<QueueDispatcher>,
}

impl AppContext {
    /// Opens the database, waiting for it to become reachable according to `retry`.
    pub async fn connect(config: &StoreConfig, retry: &RetryPolicy) -> Result<Self, StoreError> {
        let db = retry
            .run("open database", || open_database(&config.database))
            .await?;
        info!("Connected to '{}'", config.database);
        Ok(Self {
            dataset: Arc::new(DatasetStore::new(db.clone(), config.dataset_file.clone())),
            jobs: Arc::new(JobStore::new(db.clone())),
            queues: Arc::new(QueueDispatcher::new(db, config.queue_poll_interval)),
        })
    }

    /// Creates the job and puts it on its work type's queue.
    pub async fn submit_job(&self, work_type: WorkType, selector: Selector) -> Result<Job, StoreError> {
        let job = self.jobs.create(work_type, selector).await?;
        self.queues.enqueue(job.key(), work_type).await?;
        metrics::JOBS_SUBMITTED.inc();
        info!("Submitted {} job {}", work_type, job.id);
        Ok(job)
    }
}
