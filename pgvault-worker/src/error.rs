use pgvault_common::error::{DatabaseError, ParseError};
use pgvault_common::queue::QueueError;
use pgvault_common::store::StoreError;
use thiserror::Error;

/// Enumeration of errors a job handler can surface to the dispatcher. The
/// dispatcher records the message on the job (and backup) rows, then decides
/// retry vs failure from `is_retryable`.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A referenced instance, backup or job row is missing. Never retried:
    /// the row will not come back.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// `pg_dump` exited non-zero or could not be spawned. The message
    /// carries the combined tool output.
    #[error("{0}")]
    Dump(String),

    /// `psql` exited non-zero or could not be spawned.
    #[error("{0}")]
    Restore(String),

    /// Temp-directory creation, stat or delete failure.
    #[error("{0}")]
    Fs(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Control-database failure. The dispatcher leaves the job row in its
    /// current state; the staleness reaper recovers it.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl WorkerError {
    pub fn instance_not_found(id: &str) -> Self {
        WorkerError::NotFound {
            kind: "instance",
            id: id.to_owned(),
        }
    }

    pub fn backup_not_found(id: impl ToString) -> Self {
        WorkerError::NotFound {
            kind: "backup",
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkerError::NotFound { .. } | WorkerError::Parse(_))
    }
}
