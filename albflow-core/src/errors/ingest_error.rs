//! Ingestion pipeline errors.

use super::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Exactly one ingestion may be active per pipeline instance.
    #[error("ingestion already in progress")]
    Busy,

    #[error("I/O error on {file}: {message}")]
    Io { file: String, message: String },

    #[error("download batch not found: {batch_id}")]
    BatchNotFound { batch_id: String },

    #[error("batch {batch_id} is {status}, expected a completed batch")]
    BatchNotReady { batch_id: String, status: String },

    #[error("no batch ledger configured for this pipeline")]
    LedgerUnavailable,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn io(file: impl Into<String>, e: impl std::fmt::Display) -> Self {
        Self::Io {
            file: file.into(),
            message: e.to_string(),
        }
    }
}
