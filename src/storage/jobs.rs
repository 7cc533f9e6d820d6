use serde_json::Value;
use tokio_rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::instrument;

use super::{encoding_error, StoreError};
use crate::types::{Job, JobKey, JobStatus, Selector, WorkType};

/// Durable map `job.<uuid>` → job record. Each write replaces the whole row.
pub struct JobStore {
    db: Connection,
}

pub(super) enum Loaded {
    Missing,
    Corrupt(String),
    Found(Job),
}

impl Loaded {
    pub(super) fn into_job(self, key: &JobKey) -> Result<Job, StoreError> {
        match self {
            Loaded::Found(job) => Ok(job),
            Loaded::Missing => Err(StoreError::NotFound(key.to_string())),
            Loaded::Corrupt(e) => Err(StoreError::Corrupt(format!("{key}: {e}"))),
        }
    }
}

/// Loads the job inside `tx` and lets `change` modify it. The row is rewritten
/// only if `change` returns true. Committing is up to the caller.
pub(super) fn modify_in(
    tx: &Transaction<'_>,
    key: &str,
    change: impl FnOnce(&mut Job) -> bool,
) -> tokio_rusqlite::Result<Loaded> {
    let body = tx
        .query_row("SELECT body FROM jobs WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    let Some(body) = body else {
        return Ok(Loaded::Missing);
    };
    let mut job: Job = match serde_json::from_str(&body) {
        Ok(job) => job,
        Err(e) => return Ok(Loaded::Corrupt(e.to_string())),
    };
    if change(&mut job) {
        let body = serde_json::to_string(&job).map_err(encoding_error)?;
        tx.execute("UPDATE jobs SET body = ?2 WHERE key = ?1", [key, body.as_str()])?;
    }
    Ok(Loaded::Found(job))
}

impl JobStore {
    pub fn new(db: Connection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn create(&self, work_type: WorkType, selector: Selector) -> Result<Job, StoreError> {
        let job = Job::new(JobKey::new(), work_type, selector);
        let key = job.key().to_string();
        let body = serde_json::to_string(&job).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.db
            .call(move |db| {
                db.execute("INSERT INTO jobs(key, body) VALUES(?1, ?2)", [key, body])?;
                Ok(())
            })
            .await?;
        Ok(job)
    }

    /// Looks a job up by its id, with or without the `job.` prefix.
    pub async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let key = JobKey::parse(id).ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        self.get_by_key(key).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_key(&self, key: JobKey) -> Result<Job, StoreError> {
        let key_str = key.to_string();
        let body = self
            .db
            .call(move |db| {
                let body = db
                    .query_row("SELECT body FROM jobs WHERE key = ?1", [key_str], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(body)
            })
            .await?;
        match body {
            Some(body) => decode(&key, &body),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Sets the status and refreshes `updated_at`. `results` are stored only
    /// when the job has none yet, so a repeated completion can't replace them.
    #[instrument(skip(self, results), err)]
    pub async fn update_status(
        &self,
        key: JobKey,
        status: JobStatus,
        results: Option<Value>,
    ) -> Result<Job, StoreError> {
        let key_str = key.to_string();
        let loaded = self
            .db
            .call(move |db| {
                let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let loaded = modify_in(&tx, &key_str, |job| {
                    job.apply_update(status, results);
                    true
                })?;
                tx.commit()?;
                Ok(loaded)
            })
            .await?;
        loaded.into_job(&key)
    }

    #[instrument(skip_all)]
    pub async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .db
            .call(|db| {
                let mut stmt = db.prepare_cached("SELECT key, body FROM jobs")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter()
            .map(|(key, body)| {
                serde_json::from_str(&body).map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))
            })
            .collect()
    }
}

fn decode(key: &JobKey, body: &str) -> Result<Job, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))
}
