//! Ingestion pipeline integration tests: file and buffer entry points,
//! gzip handling, malformed-line policy, single-flight, cancellation,
//! batch-ledger processing, and the throughput processor.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use albflow_core::models::{BatchStatus, DownloadBatch, FilterCriteria};
use albflow_core::traits::IBatchLedger;
use albflow_ingest::{IngestOptions, IngestionPipeline, OptimizedBatchProcessor};
use albflow_storage::LogStorageEngine;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn log_line(second: u32, url: &str, status: u16) -> String {
    format!(
        "h2 2023-12-01T10:30:{second:02}.123456Z app/my-lb/50dc6c495c0c9188 \
         203.0.113.12:54321 10.0.1.50:8080 0.001 0.045 0.002 {status} {status} 1024 2048 \
         \"GET https://api.example.com{url} HTTP/1.1\" \"Mozilla/5.0\" - - \
         arn:aws:elasticloadbalancing:tg/abc \"Root=1-abc\" \"api.example.com\" \"-\" \
         0 2023-12-01T10:30:{second:02}.120000Z \"forward\" \"-\" \"-\" \
         \"10.0.1.50:8080\" \"{status}\" \"-\" \"-\" - - TID_{second:04}"
    )
}

fn write_log_file(dir: &tempfile::TempDir, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.path().join(name);
    let contents = lines.join("\n");
    if name.ends_with(".gz") {
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(contents.as_bytes()).unwrap();
        encoder.finish().unwrap();
    } else {
        std::fs::write(&path, contents).unwrap();
    }
    path
}

fn pipeline() -> (IngestionPipeline, Arc<LogStorageEngine>) {
    let engine = Arc::new(LogStorageEngine::open_in_memory().unwrap());
    let pipeline = IngestionPipeline::with_ledger(engine.clone(), engine.clone());
    (pipeline, engine)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Local files
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn ingests_valid_lines_and_ignores_blanks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log_file(
        &dir,
        "access.log",
        &[
            log_line(1, "/a", 200),
            String::new(),
            log_line(2, "/b", 200),
            log_line(3, "/c", 304),
        ],
    );

    let (pipeline, engine) = pipeline();
    let report = pipeline
        .ingest_local(&[path], &IngestOptions::default())
        .unwrap();

    assert!(report.success);
    assert_eq!(report.total_files, 1);
    assert_eq!(report.processed_files, 1);
    assert_eq!(report.successfully_parsed, 3);
    assert_eq!(report.failed_lines, 0);
    assert!(report.errors.is_empty());
    assert_eq!(report.inserted, 3);
    assert!(report.records.is_none());
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 3);
}

#[test]
fn gzip_files_are_decompressed_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log_file(
        &dir,
        "access.log.gz",
        &[log_line(1, "/gz", 200), log_line(2, "/gz", 200)],
    );

    let (pipeline, engine) = pipeline();
    let report = pipeline
        .ingest_local(&[path], &IngestOptions::default())
        .unwrap();
    assert!(report.success);
    assert_eq!(report.successfully_parsed, 2);
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 2);
}

#[test]
fn malformed_lines_are_skipped_as_warnings_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log_file(
        &dir,
        "access.log",
        &[
            log_line(1, "/ok", 200),
            "definitely not an alb line".to_string(),
            log_line(2, "/ok", 200),
        ],
    );

    let (pipeline, _engine) = pipeline();
    let seen_errors = Arc::new(Mutex::new(Vec::new()));
    let sink = seen_errors.clone();
    let options = IngestOptions {
        on_error: Some(Box::new(move |e| {
            sink.lock().unwrap().push(e.clone());
        })),
        ..IngestOptions::default()
    };

    let report = pipeline.ingest_local(&[path], &options).unwrap();
    assert!(report.success);
    assert_eq!(report.successfully_parsed, 2);
    assert_eq!(report.failed_lines, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        report.errors[0].severity,
        albflow_ingest::ErrorSeverity::Warning
    );
    assert_eq!(report.errors[0].line_number, Some(2));
    assert_eq!(seen_errors.lock().unwrap().len(), 1);
}

#[test]
fn strict_mode_marks_result_unsuccessful() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log_file(
        &dir,
        "access.log",
        &[log_line(1, "/ok", 200), "garbage".to_string()],
    );

    let (pipeline, engine) = pipeline();
    let options = IngestOptions {
        skip_malformed_lines: false,
        ..IngestOptions::default()
    };
    let report = pipeline.ingest_local(&[path], &options).unwrap();
    assert!(!report.success);
    assert_eq!(
        report.errors[0].severity,
        albflow_ingest::ErrorSeverity::Error
    );
    // The valid line is still stored.
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 1);
}

#[test]
fn missing_file_is_critical_but_other_files_continue() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_log_file(&dir, "good.log", &[log_line(1, "/ok", 200)]);
    let missing = dir.path().join("missing.log");

    let (pipeline, engine) = pipeline();
    let report = pipeline
        .ingest_local(&[missing, good], &IngestOptions::default())
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.processed_files, 2);
    assert_eq!(report.successfully_parsed, 1);
    assert_eq!(
        report.errors[0].severity,
        albflow_ingest::ErrorSeverity::Critical
    );
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 1);
}

#[test]
fn collect_records_returns_the_stored_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_log_file(&dir, "a.log", &[log_line(1, "/r", 200), log_line(2, "/r", 200)]);

    let (pipeline, _engine) = pipeline();
    let options = IngestOptions {
        collect_records: true,
        ..IngestOptions::default()
    };
    let report = pipeline.ingest_local(&[path], &options).unwrap();
    let records = report.records.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].request_url, "https://api.example.com/r");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Single flight & cancellation
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn reentrant_ingest_fails_with_busy() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..120).map(|i| log_line((i % 60) as u32, "/busy", 200)).collect();
    let path = write_log_file(&dir, "big.log", &lines);

    let engine = Arc::new(LogStorageEngine::open_in_memory().unwrap());
    let pipeline = Arc::new(IngestionPipeline::new(engine.clone()));

    let reentry = Arc::new(Mutex::new(None));
    let reentry_sink = reentry.clone();
    let inner = pipeline.clone();
    let inner_dir = dir.path().join("other.log");
    std::fs::write(&inner_dir, log_line(1, "/x", 200)).unwrap();

    let options = IngestOptions {
        on_progress: Some(Box::new(move |_p| {
            let result = inner.ingest_local(&[inner_dir.clone()], &IngestOptions::default());
            *reentry_sink.lock().unwrap() = Some(result);
        })),
        ..IngestOptions::default()
    };

    let report = pipeline.ingest_local(&[path], &options).unwrap();
    assert!(report.success);

    let reentry = reentry.lock().unwrap().take().unwrap();
    assert!(matches!(
        reentry,
        Err(albflow_core::errors::IngestError::Busy)
    ));
    assert!(!pipeline.is_processing());
}

#[test]
fn cancellation_keeps_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..500).map(|i| log_line((i % 60) as u32, "/c", 200)).collect();
    let path = write_log_file(&dir, "big.log", &lines);

    let engine = Arc::new(LogStorageEngine::open_in_memory().unwrap());
    let pipeline = Arc::new(IngestionPipeline::new(engine.clone()));

    let canceller = pipeline.clone();
    let options = IngestOptions {
        batch_size: 50,
        on_progress: Some(Box::new(move |_p| canceller.cancel())),
        ..IngestOptions::default()
    };

    let report = pipeline.ingest_local(&[path], &options).unwrap();
    assert!(report.successfully_parsed < 500, "cancel should cut the run short");
    assert!(report.inserted > 0);
    // Records were stored before the cancel, so the run still counts.
    assert!(report.success);
    assert_eq!(
        engine.count(&FilterCriteria::default()).unwrap(),
        report.inserted
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Buffers & download batches
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn buffer_entry_handles_plain_and_gzip() {
    let (pipeline, engine) = pipeline();

    let plain = format!("{}\n{}", log_line(1, "/buf", 200), log_line(2, "/buf", 200));
    let report = pipeline
        .ingest_buffer(plain.into_bytes(), "s3-object.log", &IngestOptions::default())
        .unwrap();
    assert_eq!(report.successfully_parsed, 2);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(log_line(3, "/buf", 200).as_bytes()).unwrap();
    let gz = encoder.finish().unwrap();
    let report = pipeline
        .ingest_buffer(gz, "s3-object.log.gz", &IngestOptions::default())
        .unwrap();
    assert_eq!(report.successfully_parsed, 1);

    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 3);
}

fn seeded_batch(engine: &LogStorageEngine, files: Vec<PathBuf>) -> String {
    let now = Utc::now();
    let batch_id = "batch-1".to_string();
    let batch = DownloadBatch {
        batch_id: batch_id.clone(),
        batch_name: "nightly".to_string(),
        download_date: now,
        file_count: files.len() as u32,
        total_size_bytes: 0,
        s3_file_paths: files
            .iter()
            .map(|p| format!("s3://logs/prod/{}", p.file_name().unwrap().to_string_lossy()))
            .collect(),
        local_file_paths: files.iter().map(|p| p.display().to_string()).collect(),
        status: BatchStatus::Completed,
        error_message: None,
        download_started_at: Some(now),
        download_completed_at: Some(now),
        estimated_size_bytes: 0,
        progress_percentage: 100.0,
        created_at: now,
        updated_at: now,
    };
    engine.create_batch(&batch).unwrap();
    batch_id
}

#[test]
fn batch_ingest_transitions_to_processed() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_log_file(&dir, "a.log", &[log_line(1, "/a", 200)]);
    let b = write_log_file(&dir, "b.log.gz", &[log_line(2, "/b", 200)]);

    let (pipeline, engine) = pipeline();
    let batch_id = seeded_batch(&engine, vec![a, b]);

    let report = pipeline
        .ingest_batch(&batch_id, &IngestOptions::default())
        .unwrap();
    assert!(report.success);
    assert_eq!(report.successfully_parsed, 2);
    assert_eq!(
        engine.get_batch(&batch_id).unwrap().unwrap().status,
        BatchStatus::Processed
    );
}

#[test]
fn batch_ingest_records_failure_on_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.log");

    let (pipeline, engine) = pipeline();
    let batch_id = seeded_batch(&engine, vec![missing]);

    let report = pipeline
        .ingest_batch(&batch_id, &IngestOptions::default())
        .unwrap();
    assert!(!report.success);

    let batch = engine.get_batch(&batch_id).unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Error);
    assert!(batch.error_message.is_some());
}

#[test]
fn batch_ingest_requires_a_completed_batch() {
    let (pipeline, engine) = pipeline();
    let batch_id = seeded_batch(&engine, vec![]);
    engine
        .update_batch_status(&batch_id, BatchStatus::Processing, None)
        .unwrap();

    let err = pipeline
        .ingest_batch(&batch_id, &IngestOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        albflow_core::errors::IngestError::BatchNotReady { .. }
    ));

    let err = pipeline
        .ingest_batch("no-such-batch", &IngestOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        albflow_core::errors::IngestError::BatchNotFound { .. }
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Throughput processor
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn optimized_processor_reports_throughput() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|f| {
            let lines: Vec<String> =
                (0..40).map(|i| log_line((i % 60) as u32, "/fast", 200)).collect();
            write_log_file(&dir, &format!("f{f}.log"), &lines)
        })
        .collect();

    // Parallel per-file transactions need a real WAL database.
    let db_path = dir.path().join("optimized.db");
    let engine = Arc::new(
        LogStorageEngine::open(&db_path, &albflow_core::config::DatabaseConfig::default())
            .unwrap(),
    );
    let processor = OptimizedBatchProcessor::new(engine.clone())
        .with_parallelism(2)
        .with_batch_size(16);

    let report = processor.process_files(&files).unwrap();
    assert!(report.success);
    assert_eq!(report.total_records, 120);
    assert_eq!(report.failed_lines, 0);
    assert!(report.records_per_second > 0.0);
    assert_eq!(report.files.len(), 3);
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 120);
}
