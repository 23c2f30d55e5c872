//! The line-accurate ingestion pipeline.
//!
//! Single-flight per instance: a second `ingest_*` call while one is
//! active fails with `Busy`. Cancellation is cooperative, checked between
//! lines and between files; whatever was stored before the flag was seen
//! stays stored and is reflected in the report.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use albflow_core::config::IngestionConfig;
use albflow_core::errors::IngestError;
use albflow_core::models::{BatchStatus, LogRecord};
use albflow_core::traits::{IBatchLedger, ILogEntryStore};
use tracing::{debug, info, warn};

use crate::progress::{ErrorSeverity, ProcessingError, Progress};
use crate::reader;

/// Observer cadence: at most one progress callback per this many lines,
/// plus one at completion.
const PROGRESS_CALLBACK_EVERY: u64 = 100;

pub type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&ProcessingError) + Send + Sync>;

/// Per-call ingestion options. Observer callbacks ride along here so the
/// pipeline stays free of event-emitter coupling.
pub struct IngestOptions {
    pub batch_size: usize,
    pub max_concurrent_files: usize,
    pub skip_malformed_lines: bool,
    /// Return the parsed records in the report (they are stored either
    /// way; per-batch inserts are the only write path).
    pub collect_records: bool,
    pub on_progress: Option<ProgressCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_files: 1,
            skip_malformed_lines: true,
            collect_records: false,
            on_progress: None,
            on_error: None,
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrent_files: config.max_concurrent_files.max(1),
            skip_malformed_lines: config.skip_malformed_lines,
            ..Self::default()
        }
    }
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub success: bool,
    pub total_files: usize,
    pub processed_files: usize,
    pub total_lines: u64,
    pub successfully_parsed: u64,
    pub failed_lines: u64,
    pub inserted: u64,
    pub errors: Vec<ProcessingError>,
    pub duration_ms: u64,
    /// Present only when `collect_records` was requested.
    pub records: Option<Vec<LogRecord>>,
}

/// A unit of input: a file on disk or an in-memory object.
enum Source {
    File(PathBuf),
    Buffer(Vec<u8>, String),
}

impl Source {
    fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Buffer(_, name) => name.clone(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Self::File(path) => reader::file_size(path),
            Self::Buffer(bytes, _) => bytes.len() as u64,
        }
    }

    fn open(self) -> Result<Box<dyn BufRead + Send>, IngestError> {
        match self {
            Self::File(path) => reader::open_file(&path),
            Self::Buffer(bytes, name) => Ok(reader::open_buffer(bytes, &name)),
        }
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn ILogEntryStore>,
    ledger: Option<Arc<dyn IBatchLedger>>,
    is_processing: AtomicBool,
    cancel_requested: AtomicBool,
    progress: Mutex<Progress>,
    inserted: AtomicU64,
    unsuccessful: AtomicBool,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn ILogEntryStore>) -> Self {
        Self {
            store,
            ledger: None,
            is_processing: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            progress: Mutex::new(Progress::new(0, 0)),
            inserted: AtomicU64::new(0),
            unsuccessful: AtomicBool::new(false),
        }
    }

    /// A pipeline that can also process download batches.
    pub fn with_ledger(store: Arc<dyn ILogEntryStore>, ledger: Arc<dyn IBatchLedger>) -> Self {
        Self {
            ledger: Some(ledger),
            ..Self::new(store)
        }
    }

    /// Ingest local files (plain or gzip).
    pub fn ingest_local(
        &self,
        paths: &[PathBuf],
        options: &IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let sources = paths.iter().cloned().map(Source::File).collect();
        self.run(sources, options)
    }

    /// Ingest one in-memory object (e.g. fetched from S3); gzip is
    /// detected from the logical name.
    pub fn ingest_buffer(
        &self,
        bytes: Vec<u8>,
        logical_name: &str,
        options: &IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let sources = vec![Source::Buffer(bytes, logical_name.to_string())];
        self.run(sources, options)
    }

    /// Ingest every file of a completed download batch, moving the batch
    /// through `processing -> processed` (or `error`).
    pub fn ingest_batch(
        &self,
        batch_id: &str,
        options: &IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let ledger = self.ledger.clone().ok_or(IngestError::LedgerUnavailable)?;
        let batch = ledger
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

        ledger.update_batch_status(batch_id, BatchStatus::Processing, None)?;
        info!("processing download batch {batch_id} ({} files)", batch.local_file_paths.len());

        let paths: Vec<PathBuf> = batch.local_file_paths.iter().map(PathBuf::from).collect();
        match self.ingest_local(&paths, options) {
            Ok(report) if report.success => {
                ledger.update_batch_status(batch_id, BatchStatus::Processed, None)?;
                Ok(report)
            }
            Ok(report) => {
                let message = report
                    .errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                ledger.update_batch_status(batch_id, BatchStatus::Error, Some(&message))?;
                Ok(report)
            }
            Err(e) => {
                let _ =
                    ledger.update_batch_status(batch_id, BatchStatus::Error, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Request cancellation; checked between lines and between files.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Snapshot of the current progress.
    pub fn progress(&self) -> Progress {
        self.progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|_| Progress::new(0, 0))
    }

    // ─── Core loop ───────────────────────────────────────────────────────

    fn run(
        &self,
        sources: Vec<Source>,
        options: &IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let _guard = self.begin()?;
        let started = Instant::now();

        let total_files = sources.len();
        let total_bytes = sources.iter().map(Source::size).sum();
        if let Ok(mut progress) = self.progress.lock() {
            *progress = Progress::new(total_files, total_bytes);
        }
        self.inserted.store(0, Ordering::SeqCst);
        self.unsuccessful.store(false, Ordering::SeqCst);

        let collected = Mutex::new(Vec::new());
        let group_size = options.max_concurrent_files.max(1);

        let mut iter = sources.into_iter();
        loop {
            if self.cancel_requested.load(Ordering::SeqCst) {
                break;
            }
            let group: Vec<Source> = iter.by_ref().take(group_size).collect();
            if group.is_empty() {
                break;
            }

            if group.len() == 1 {
                for source in group {
                    self.process_source(source, options, &collected, started);
                }
            } else {
                std::thread::scope(|scope| {
                    for source in group {
                        scope.spawn(|| self.process_source(source, options, &collected, started));
                    }
                });
            }
        }

        let cancelled = self.cancel_requested.load(Ordering::SeqCst);
        let inserted = self.inserted.load(Ordering::SeqCst);
        let unsuccessful = self.unsuccessful.load(Ordering::SeqCst);

        let (errors, total_lines, successfully_parsed, failed_lines, processed_files) = {
            let mut progress = self
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            progress.is_complete = true;
            progress.current_file = None;
            progress.total_lines = progress.processed_lines;
            progress.estimated_remaining_ms = Some(0);
            if let Some(cb) = &options.on_progress {
                cb(&progress);
            }
            (
                progress.errors.clone(),
                progress.total_lines,
                progress.successfully_parsed,
                progress.failed_lines,
                progress.processed_files,
            )
        };

        let success = !unsuccessful && !(cancelled && inserted == 0);
        let report = IngestReport {
            success,
            total_files,
            processed_files,
            total_lines,
            successfully_parsed,
            failed_lines,
            inserted,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
            records: options
                .collect_records
                .then(|| collected.into_inner().unwrap_or_default()),
        };
        info!(
            files = report.total_files,
            parsed = report.successfully_parsed,
            failed = report.failed_lines,
            inserted = report.inserted,
            ms = report.duration_ms,
            success = report.success,
            "ingestion finished"
        );
        Ok(report)
    }

    fn process_source(
        &self,
        source: Source,
        options: &IngestOptions,
        collected: &Mutex<Vec<LogRecord>>,
        started: Instant,
    ) {
        let name = source.name();
        debug!("processing {name}");
        if let Ok(mut progress) = self.progress.lock() {
            progress.current_file = Some(name.clone());
        }

        let reader = match source.open() {
            Ok(reader) => reader,
            Err(e) => {
                self.record_error(
                    ProcessingError::new(&name, None, e.to_string(), ErrorSeverity::Critical),
                    options,
                );
                self.unsuccessful.store(true, Ordering::SeqCst);
                self.finish_file();
                return;
            }
        };

        let batch_size = options.batch_size.max(1);
        let mut batch: Vec<LogRecord> = Vec::with_capacity(batch_size);
        let mut line_number: u64 = 0;

        for line_result in reader.lines() {
            if self.cancel_requested.load(Ordering::SeqCst) {
                break;
            }

            let line = match line_result {
                Ok(line) => line,
                Err(e) => {
                    self.record_error(
                        ProcessingError::new(
                            &name,
                            Some(line_number + 1),
                            format!("read failed: {e}"),
                            ErrorSeverity::Critical,
                        ),
                        options,
                    );
                    self.unsuccessful.store(true, Ordering::SeqCst);
                    self.flush_batch(&name, &mut batch, options, collected);
                    self.finish_file();
                    return;
                }
            };
            line_number += 1;

            let is_blank = line.trim().is_empty();
            let mut parsed_ok = false;
            let mut failed = false;
            if !is_blank {
                match albflow_parser::parse(&line) {
                    Ok(record) => {
                        parsed_ok = true;
                        batch.push(record);
                    }
                    Err(e) => {
                        failed = true;
                        let severity = if options.skip_malformed_lines {
                            ErrorSeverity::Warning
                        } else {
                            self.unsuccessful.store(true, Ordering::SeqCst);
                            ErrorSeverity::Error
                        };
                        self.record_error(
                            ProcessingError::new(&name, Some(line_number), e.to_string(), severity),
                            options,
                        );
                    }
                }
            }

            if batch.len() >= batch_size && !self.flush_batch(&name, &mut batch, options, collected)
            {
                self.finish_file();
                return;
            }

            if let Ok(mut progress) = self.progress.lock() {
                progress.processed_lines += 1;
                progress.processed_bytes += line.len() as u64 + 1;
                if parsed_ok {
                    progress.successfully_parsed += 1;
                }
                if failed {
                    progress.failed_lines += 1;
                }
                if progress.processed_lines % PROGRESS_CALLBACK_EVERY == 0 {
                    progress.update_estimate(started.elapsed().as_millis() as u64);
                    if let Some(cb) = &options.on_progress {
                        cb(&progress);
                    }
                }
            }
        }

        self.flush_batch(&name, &mut batch, options, collected);
        self.finish_file();
    }

    /// Hand the buffered records to storage. Returns false when the file
    /// should be abandoned (storage failure is critical).
    fn flush_batch(
        &self,
        file_name: &str,
        batch: &mut Vec<LogRecord>,
        options: &IngestOptions,
        collected: &Mutex<Vec<LogRecord>>,
    ) -> bool {
        if batch.is_empty() {
            return true;
        }
        let records = std::mem::take(batch);

        match self.store.store_batch(&records, records.len()) {
            Ok(result) => {
                self.inserted.fetch_add(result.inserted, Ordering::SeqCst);
                if result.failed > 0 {
                    warn!("storage rejected {} records from {file_name}", result.failed);
                    self.record_error(
                        ProcessingError::new(
                            file_name,
                            None,
                            format!(
                                "storage rejected {} records: {}",
                                result.failed,
                                result.errors.join("; ")
                            ),
                            ErrorSeverity::Critical,
                        ),
                        options,
                    );
                    self.unsuccessful.store(true, Ordering::SeqCst);
                    return false;
                }
                if options.collect_records {
                    if let Ok(mut collected) = collected.lock() {
                        collected.extend(records);
                    }
                }
                true
            }
            Err(e) => {
                self.record_error(
                    ProcessingError::new(
                        file_name,
                        None,
                        format!("storage error: {e}"),
                        ErrorSeverity::Critical,
                    ),
                    options,
                );
                self.unsuccessful.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn record_error(&self, error: ProcessingError, options: &IngestOptions) {
        if let Some(cb) = &options.on_error {
            cb(&error);
        }
        if let Ok(mut progress) = self.progress.lock() {
            progress.errors.push(error);
        }
    }

    fn finish_file(&self) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.processed_files += 1;
        }
    }

    fn begin(&self) -> Result<ProcessingGuard<'_>, IngestError> {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IngestError::Busy);
        }
        self.cancel_requested.store(false, Ordering::SeqCst);
        Ok(ProcessingGuard { pipeline: self })
    }
}

/// Clears the single-flight flag when the ingestion call unwinds.
struct ProcessingGuard<'a> {
    pipeline: &'a IngestionPipeline,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.pipeline.is_processing.store(false, Ordering::SeqCst);
    }
}
