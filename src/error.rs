// ❗ Error types for the ingestion library
// Row-level problems never show up here: they land in the BatchReport.
// These are the failures that stop a file (or the whole run).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// File could not be read or decoded as CSV. Fatal for that file only.
    #[error("cannot read {path}: {reason}")]
    FileUnreadable { path: PathBuf, reason: String },

    /// Input path is neither a file nor a directory we can walk
    #[error("input path not found: {0}")]
    InputNotFound(PathBuf),

    /// Storage failure that is NOT a constraint violation; aborts the batch
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Row count after commit does not match what the writer inserted
    #[error("consistency check failed: expected {expected} rows, found {found}")]
    CountMismatch { expected: i64, found: i64 },
}

impl IngestError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IngestError::FileUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
