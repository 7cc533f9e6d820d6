use std::time::Duration;

use camino::Utf8Path as Path;
use tokio_rusqlite::{Connection, ErrorCode};
use tracing::{debug, instrument};

pub mod dataset;
pub mod jobs;
pub mod local_fs;
pub mod queue;
pub mod retry;
pub mod spots_file;

pub use dataset::DatasetStore;
pub use jobs::JobStore;
pub use queue::QueueDispatcher;
pub use retry::RetryPolicy;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Store is unavailable: {0}")]
    Unavailable(#[source] tokio_rusqlite::Error),
    #[error("Job id supplied led to no hits: {0}")]
    NotFound(String),
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("Database error: {0}")]
    Database(#[source] tokio_rusqlite::Error),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        if is_unavailable(&err) {
            StoreError::Unavailable(err)
        } else {
            StoreError::Database(err)
        }
    }
}

// Errors that go away once the database file becomes reachable again.
fn is_unavailable(err: &tokio_rusqlite::Error) -> bool {
    match err {
        tokio_rusqlite::Error::ConnectionClosed => true,
        tokio_rusqlite::Error::Rusqlite(e) => matches!(
            e.sqlite_error_code(),
            Some(ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        ),
        _ => false,
    }
}

pub(crate) fn encoding_error(err: serde_json::Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(err))
}

/// Opens the shared database and makes sure the schema exists.
/// `:memory:` opens a private in-memory database.
#[instrument(err)]
pub async fn open_database(path: &Path) -> Result<Connection, StoreError> {
    if path.as_str() != ":memory:" {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let db = Connection::open(path.as_std_path()).await?;
    db.call(|db| {
        db.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Journal mode: {mode}");
        db.execute_batch(
            r"
            BEGIN;
            CREATE TABLE IF NOT EXISTS datasets(key TEXT PRIMARY KEY, records TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS jobs(key TEXT PRIMARY KEY, body TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS queue_items(
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                job_key TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_items_queue_seq ON queue_items(queue, seq);
            COMMIT;",
        )?;
        Ok(())
    })
    .await?;
    Ok(db)
}
