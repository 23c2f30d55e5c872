//! Throughput-optimised batch processing.
//!
//! Files fan out across a rayon pool (default 4); each file is parsed
//! fully into a local buffer, then written under one explicit
//! BEGIN/COMMIT transaction in `batch_size` sub-batches. Trades
//! line-level accounting for records/second.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use albflow_core::errors::{IngestError, StorageError};
use albflow_core::models::{BatchStatus, LogRecord};
use albflow_core::traits::IBatchLedger;
use albflow_storage::queries::log_entries;
use albflow_storage::LogStorageEngine;
use chrono::Utc;
use tracing::{debug, info, warn};

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Per-file timings and counts.
#[derive(Debug, Clone)]
pub struct FileThroughput {
    pub file_name: String,
    pub records: u64,
    pub failed_lines: u64,
    pub parse_ms: u64,
    pub insert_ms: u64,
    pub error: Option<String>,
}

/// Whole-run report with the records/second headline number.
#[derive(Debug, Clone)]
pub struct ThroughputReport {
    pub files: Vec<FileThroughput>,
    pub total_records: u64,
    pub failed_lines: u64,
    pub duration_ms: u64,
    pub records_per_second: f64,
    pub success: bool,
}

pub struct OptimizedBatchProcessor {
    engine: Arc<LogStorageEngine>,
    parallelism: usize,
    batch_size: usize,
}

impl OptimizedBatchProcessor {
    pub fn new(engine: Arc<LogStorageEngine>) -> Self {
        Self {
            engine,
            parallelism: DEFAULT_PARALLELISM,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Process every file of a completed download batch, with ledger
    /// transitions as in the line-accurate pipeline.
    pub fn process_batch(&self, batch_id: &str) -> Result<ThroughputReport, IngestError> {
        let batch = self
            .engine
            .get_batch(batch_id)?
            .ok_or_else(|| IngestError::BatchNotFound {
                batch_id: batch_id.to_string(),
            })?;
        if batch.status != BatchStatus::Completed {
            return Err(IngestError::BatchNotReady {
                batch_id: batch_id.to_string(),
                status: batch.status.as_str().to_string(),
            });
        }

        self.engine
            .update_batch_status(batch_id, BatchStatus::Processing, None)?;
        let paths: Vec<PathBuf> = batch.local_file_paths.iter().map(PathBuf::from).collect();
        let report = self.process_files(&paths)?;

        if report.success {
            self.engine
                .update_batch_status(batch_id, BatchStatus::Processed, None)?;
        } else {
            let message = report
                .files
                .iter()
                .filter_map(|f| f.error.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            self.engine
                .update_batch_status(batch_id, BatchStatus::Error, Some(&message))?;
        }
        Ok(report)
    }

    /// Parallel parse + per-file transactional insert.
    pub fn process_files(&self, paths: &[PathBuf]) -> Result<ThroughputReport, IngestError> {
        let started = Instant::now();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .thread_name(|i| format!("albflow-batch-{i}"))
            .build()
            .map_err(|e| IngestError::io("rayon pool", e))?;

        let files: Vec<FileThroughput> = pool.install(|| {
            use rayon::prelude::*;
            paths
                .par_iter()
                .map(|path| self.process_one_file(path))
                .collect()
        });

        let total_records: u64 = files.iter().map(|f| f.records).sum();
        let failed_lines: u64 = files.iter().map(|f| f.failed_lines).sum();
        let duration_ms = started.elapsed().as_millis() as u64;
        let records_per_second = if duration_ms == 0 {
            total_records as f64 * 1000.0
        } else {
            total_records as f64 * 1000.0 / duration_ms as f64
        };
        let success = files.iter().all(|f| f.error.is_none());

        info!(
            files = files.len(),
            records = total_records,
            rps = records_per_second,
            "optimized batch processing finished"
        );
        Ok(ThroughputReport {
            files,
            total_records,
            failed_lines,
            duration_ms,
            records_per_second,
            success,
        })
    }

    fn process_one_file(&self, path: &Path) -> FileThroughput {
        let name = path.display().to_string();
        let parse_started = Instant::now();

        let mut result = FileThroughput {
            file_name: name.clone(),
            records: 0,
            failed_lines: 0,
            parse_ms: 0,
            insert_ms: 0,
            error: None,
        };

        let reader = match crate::reader::open_file(path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("cannot open {name}: {e}");
                result.error = Some(e.to_string());
                return result;
            }
        };

        let mut records: Vec<LogRecord> = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    result.error = Some(format!("read failed: {e}"));
                    return result;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match albflow_parser::parse(&line) {
                Ok(record) => records.push(record),
                Err(_) => result.failed_lines += 1,
            }
        }
        result.parse_ms = parse_started.elapsed().as_millis() as u64;

        let insert_started = Instant::now();
        match self.insert_file(&records) {
            Ok(inserted) => result.records = inserted as u64,
            Err(e) => result.error = Some(e.to_string()),
        }
        result.insert_ms = insert_started.elapsed().as_millis() as u64;
        debug!(
            file = name,
            records = result.records,
            parse_ms = result.parse_ms,
            insert_ms = result.insert_ms,
            "file processed"
        );
        result
    }

    /// One transaction per file; sub-batched multi-row inserts inside it.
    fn insert_file(&self, records: &[LogRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let batch_size = self.batch_size;
        self.engine.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(StorageError::connection)?;
            let created_at = Utc::now();
            let mut inserted = 0;
            for chunk in records.chunks(batch_size) {
                match log_entries::insert_records(conn, chunk, created_at) {
                    Ok(n) => inserted += n,
                    Err(e) => {
                        let _ = conn.execute_batch("ROLLBACK");
                        return Err(e);
                    }
                }
            }
            conn.execute_batch("COMMIT")
                .map_err(StorageError::connection)?;
            Ok(inserted)
        })
    }
}
