//! Storage seams. Ingestion and analysis program against these traits;
//! `albflow-storage` provides the SQLite implementation.

use chrono::{DateTime, Utc};

use crate::errors::StorageError;
use crate::models::{
    BatchInsertResult, BatchStatus, DownloadBatch, FilterCriteria, HourlySummary, LogRecord,
};

/// Sink invoked per non-empty batch of a streamed query.
/// Return `Ok(true)` to continue, `Ok(false)` to stop early; an `Err`
/// aborts the stream and propagates.
pub type RecordSink<'a> = dyn FnMut(Vec<LogRecord>) -> Result<bool, StorageError> + 'a;

/// Write + count surface the ingestion pipeline needs.
pub trait ILogEntryStore: Send + Sync {
    /// Chunked transactional insert with the default batch size.
    fn store(&self, records: &[LogRecord]) -> Result<BatchInsertResult, StorageError>;

    /// Chunked transactional insert with an explicit chunk size.
    fn store_batch(
        &self,
        records: &[LogRecord],
        batch_size: usize,
    ) -> Result<BatchInsertResult, StorageError>;

    fn count(&self, filter: &FilterCriteria) -> Result<u64, StorageError>;
}

/// Read surface the analysis orchestrator needs.
pub trait IAnalyticsStore: Send + Sync {
    fn count(&self, filter: &FilterCriteria) -> Result<u64, StorageError>;

    fn query(&self, filter: &FilterCriteria) -> Result<Vec<LogRecord>, StorageError>;

    /// Batched scan; returns the number of rows delivered to the sink.
    fn query_stream(
        &self,
        filter: &FilterCriteria,
        batch_size: usize,
        sink: &mut RecordSink<'_>,
    ) -> Result<u64, StorageError>;

    /// Fast path over the hourly summary table, newest hour first.
    fn query_aggregated(
        &self,
        filter: &FilterCriteria,
    ) -> Result<Vec<HourlySummary>, StorageError>;
}

/// Download-batch ledger operations.
pub trait IBatchLedger: Send + Sync {
    fn create_batch(&self, batch: &DownloadBatch) -> Result<(), StorageError>;

    fn get_batch(&self, batch_id: &str) -> Result<Option<DownloadBatch>, StorageError>;

    fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Count ledger files whose S3 key starts with `prefix`
    /// (an optional `s3://bucket/` prefix on the key is ignored).
    fn file_count_by_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    /// Completion time of the most recent completed batch containing a
    /// key under `prefix`.
    fn last_download_time(&self, prefix: &str) -> Result<Option<DateTime<Utc>>, StorageError>;
}
