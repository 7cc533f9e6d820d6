use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use tokio_rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{info, instrument, warn};

use super::{encoding_error, local_fs, spots_file, StoreError};
use crate::{
    metrics,
    types::{record::reindex, NewRecord, Record},
};

/// The single logical dataset of a deployment.
pub const DATASET_KEY: &str = "data";

pub struct DatasetStore {
    db: Connection,
    file_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub total: usize,
}

impl DatasetStore {
    pub fn new(db: Connection, file_path: PathBuf) -> Self {
        Self { db, file_path }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Loads the durable text file, or `seed_file` if there is none yet, and
    /// commits it as the current dataset.
    #[instrument(skip(self), err)]
    pub async fn initialize(&self, seed_file: &Path) -> Result<usize, StoreError> {
        if let Some(dir) = self.file_path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
            local_fs::remove_temps(dir)
                .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        }
        let source = if tokio::fs::try_exists(&self.file_path).await? {
            self.file_path.as_path()
        } else {
            seed_file
        };
        let records = spots_file::load(source).await?;
        let total = self.replace(records).await?;
        info!("Loaded {total} records from '{source}'");
        Ok(total)
    }

    /// Returns the last committed snapshot.
    #[instrument(skip_all)]
    pub async fn read_all(&self) -> Result<Vec<Record>, StoreError> {
        let body = self
            .db
            .call(|db| {
                let body = db
                    .query_row(
                        "SELECT records FROM datasets WHERE key = ?1",
                        [DATASET_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(body)
            })
            .await?;
        match body {
            Some(body) => decode(&body),
            None => Ok(Vec::new()),
        }
    }

    /// Appends `new_records`, re-sorts by year and reassigns ids, committing
    /// the whole sequence as one replacement.
    #[instrument(skip_all, fields(added = new_records.len()))]
    pub async fn merge(&self, new_records: Vec<NewRecord>) -> Result<MergeSummary, StoreError> {
        let added = new_records.len();
        let file_path = self.file_path.clone();
        let merged = self
            .db
            .call(move |db| {
                let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current = tx
                    .query_row(
                        "SELECT records FROM datasets WHERE key = ?1",
                        [DATASET_KEY],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                let current = match current.as_deref().map(decode).transpose() {
                    Ok(current) => current.unwrap_or_default(),
                    Err(e) => return Ok(Err(e)),
                };
                let combined: Vec<NewRecord> = current
                    .into_iter()
                    .map(NewRecord::from)
                    .chain(new_records)
                    .collect();
                let merged = reindex(combined);
                Ok(commit_with_file(tx, &file_path, &merged)?.map(|()| merged))
            })
            .await??;

        metrics::RECORDS_MERGED.inc_by(added as u64);
        metrics::DATASET_RECORDS.set(merged.len() as i64);
        Ok(MergeSummary {
            added,
            total: merged.len(),
        })
    }

    /// Replaces the whole dataset.
    #[instrument(skip_all, fields(count = records.len()))]
    pub async fn replace(&self, records: Vec<NewRecord>) -> Result<usize, StoreError> {
        let records = reindex(records);
        let total = records.len();
        let file_path = self.file_path.clone();
        self.db
            .call(move |db| {
                let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
                commit_with_file(tx, &file_path, &records)
            })
            .await??;
        metrics::DATASET_RECORDS.set(total as i64);
        Ok(total)
    }
}

/// Writes the row, rewrites the text file and only then commits. A failed
/// file write rolls the row back; a failed commit puts the old file back.
fn commit_with_file(
    tx: Transaction<'_>,
    file_path: &Path,
    records: &[Record],
) -> tokio_rusqlite::Result<Result<(), StoreError>> {
    write_row(&tx, records)?;
    let previous = match read_existing(file_path) {
        Ok(previous) => previous,
        Err(e) => return Ok(Err(e.into())),
    };
    if let Err(e) = spots_file::store(file_path, records) {
        return Ok(Err(e.into()));
    }
    if let Err(e) = tx.commit() {
        restore(file_path, previous);
        return Err(e.into());
    }
    Ok(Ok(()))
}

fn read_existing(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn restore(path: &Path, previous: Option<Vec<u8>>) {
    let result = match previous {
        Some(contents) => local_fs::write_atomic_blocking(path, &contents),
        None => std::fs::remove_file(path),
    };
    if let Err(e) = result {
        warn!("Couldn't restore '{path}' after a failed commit: {e}");
    }
}

fn write_row(tx: &Transaction<'_>, records: &[Record]) -> tokio_rusqlite::Result<()> {
    let body = serde_json::to_string(records).map_err(encoding_error)?;
    tx.execute(
        "INSERT INTO datasets(key, records) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET records = excluded.records",
        [DATASET_KEY, body.as_str()],
    )?;
    Ok(())
}

fn decode(body: &str) -> Result<Vec<Record>, StoreError> {
    serde_json::from_str(body)
        .map_err(|e| StoreError::Corrupt(format!("dataset '{DATASET_KEY}': {e}")))
}
