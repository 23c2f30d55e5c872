//! Storage integration tests: insert/query round trip, offset and keyset
//! pagination, safety caps, retention, ledger accounting, migrations.

use std::collections::HashSet;

use albflow_core::models::{
    BatchStatus, CursorDirection, DownloadBatch, FilterCriteria, LogRecord, SortOrder, TimeRange,
};
use albflow_core::traits::IBatchLedger;
use albflow_storage::pagination::MAX_QUERY_ROWS;
use albflow_storage::LogStorageEngine;
use chrono::{DateTime, Duration, TimeZone, Utc};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 1, 10, 0, 0).unwrap()
}

fn make_record(timestamp: DateTime<Utc>, url: &str, status: u16, client_ip: &str) -> LogRecord {
    LogRecord {
        id: 0,
        timestamp,
        client_ip: client_ip.parse().unwrap(),
        client_port: 54321,
        target_ip: Some("10.0.1.50".parse().unwrap()),
        target_port: 8080,
        request_processing_time: 0.001,
        target_processing_time: 0.045,
        response_processing_time: 0.002,
        elb_status_code: status,
        target_status_code: status,
        received_bytes: 1024,
        sent_bytes: 2048,
        request_verb: "GET".to_string(),
        request_url: url.to_string(),
        request_protocol: "HTTP/1.1".to_string(),
        user_agent: "Mozilla/5.0 (Windows NT 10.0) Chrome/119.0".to_string(),
        ssl_cipher: String::new(),
        ssl_protocol: String::new(),
        target_group_arn: "arn:aws:elasticloadbalancing:tg/abc".to_string(),
        trace_id: "Root=1-abc".to_string(),
        domain_name: "api.example.com".to_string(),
        chosen_cert_arn: String::new(),
        matched_rule_priority: 0,
        request_creation_time: timestamp,
        actions_executed: "forward".to_string(),
        redirect_url: String::new(),
        error_reason: String::new(),
        target_port_list: String::new(),
        target_status_code_list: String::new(),
        classification: String::new(),
        classification_reason: String::new(),
        connection_id: "TID_test".to_string(),
        created_at: DateTime::UNIX_EPOCH,
    }
}

fn seeded_engine(n: usize) -> LogStorageEngine {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    let records: Vec<LogRecord> = (0..n)
        .map(|i| {
            make_record(
                base_time() + Duration::seconds(i as i64),
                &format!("/items/{}", i % 7),
                if i % 10 == 0 { 500 } else { 200 },
                "203.0.113.12",
            )
        })
        .collect();
    let result = engine.store(&records).unwrap();
    assert_eq!(result.inserted, n as u64);
    assert_eq!(result.failed, 0);
    engine
}

// ═══════════════════════════════════════════════════════════════════════════════
// Insert then query
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn insert_then_query_round_trip() {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    let record = make_record(base_time(), "/v1/users/123", 200, "203.0.113.12");
    engine.store(std::slice::from_ref(&record)).unwrap();

    let filter = FilterCriteria {
        status_codes: vec![200],
        endpoints: vec!["/v1/users/123".to_string()],
        ..FilterCriteria::default()
    };
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 1);

    let fetched = engine.query(&filter).unwrap();
    assert_eq!(fetched.len(), 1);

    // Round trip: equal except id and created_at, which storage assigns.
    let mut stored = fetched[0].clone();
    assert!(stored.id > 0);
    assert!(stored.created_at > record.created_at);
    stored.id = record.id;
    stored.created_at = record.created_at;
    assert_eq!(stored, record);
}

#[test]
fn store_is_chunked_and_counts_failures_per_chunk() {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    let mut records: Vec<LogRecord> = (0..10)
        .map(|i| make_record(base_time() + Duration::seconds(i), "/a", 200, "203.0.113.12"))
        .collect();
    // Violates the CHECK constraint; sinks its whole chunk.
    records[7].elb_status_code = 42;

    let result = engine.store_batch(&records, 4).unwrap();
    assert_eq!(result.inserted, 4 + 2);
    assert_eq!(result.failed, 4);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 6);
}

#[test]
fn filters_compose() {
    let engine = seeded_engine(50);
    let errors = FilterCriteria {
        status_codes: vec![500],
        ..FilterCriteria::default()
    };
    assert_eq!(engine.count(&errors).unwrap(), 5);

    let filter = FilterCriteria {
        time_range: Some(TimeRange {
            start: base_time(),
            end: base_time() + Duration::seconds(9),
        }),
        user_agent_patterns: vec!["chrome".to_string()],
        ..FilterCriteria::default()
    };
    assert_eq!(engine.count(&filter).unwrap(), 10);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pagination
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn paginated_returns_newest_first() {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    let records = vec![
        make_record(base_time(), "/ten", 200, "203.0.113.12"),
        make_record(base_time() + Duration::hours(1), "/eleven", 200, "203.0.113.12"),
        make_record(base_time() + Duration::hours(2), "/twelve", 200, "203.0.113.12"),
    ];
    engine.store(&records).unwrap();

    let page = engine
        .query_paginated(&FilterCriteria::default(), 1, 2)
        .unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.total_pages, 2);
    assert!(page.has_more);
    assert_eq!(page.data[0].request_url, "/twelve");
    assert_eq!(page.data[1].request_url, "/eleven");

    let page2 = engine
        .query_paginated(&FilterCriteria::default(), 2, 2)
        .unwrap();
    assert_eq!(page2.data.len(), 1);
    assert!(!page2.has_more);
}

#[test]
fn page_and_size_are_clamped() {
    let engine = seeded_engine(5);
    let page = engine
        .query_paginated(&FilterCriteria::default(), 0, 100_000)
        .unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 1000);
    assert_eq!(page.data.len(), 5);
}

#[test]
fn cursor_walk_yields_every_row_exactly_once() {
    let engine = seeded_engine(37);
    let mut seen: HashSet<i64> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = engine
            .query_cursor(
                &FilterCriteria::default(),
                cursor.as_deref(),
                10,
                CursorDirection::Forward,
            )
            .unwrap();
        for record in &page.data {
            assert!(seen.insert(record.id), "duplicate id {}", record.id);
        }
        pages += 1;
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
        assert!(cursor.is_some());
    }

    assert_eq!(seen.len(), 37);
    assert_eq!(pages, 4);
}

#[test]
fn cursor_scan_is_stable_across_concurrent_inserts() {
    let engine = seeded_engine(20);
    let first = engine
        .query_cursor(&FilterCriteria::default(), None, 10, CursorDirection::Forward)
        .unwrap();

    // Rows newer than the scan head are invisible to the resumed scan.
    let newer = make_record(base_time() + Duration::hours(5), "/new", 200, "203.0.113.12");
    engine.store(&[newer]).unwrap();

    let mut rest = Vec::new();
    let mut cursor = first.next_cursor.clone();
    while let Some(c) = cursor {
        let page = engine
            .query_cursor(
                &FilterCriteria::default(),
                Some(&c),
                10,
                CursorDirection::Forward,
            )
            .unwrap();
        rest.extend(page.data.iter().map(|r| r.id).collect::<Vec<_>>());
        cursor = page.next_cursor;
    }

    assert_eq!(first.data.len() + rest.len(), 20);
    assert!(rest.iter().all(|id| first.data.iter().all(|r| r.id != *id)));
}

#[test]
fn backward_cursor_scans_ascending() {
    let engine = seeded_engine(10);
    let oldest = encode_oldest_cursor(&engine);
    let page = engine
        .query_cursor(
            &FilterCriteria::default(),
            Some(&oldest),
            5,
            CursorDirection::Backward,
        )
        .unwrap();
    assert!(!page.data.is_empty());
    for pair in page.data.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

fn encode_oldest_cursor(engine: &LogStorageEngine) -> String {
    let asc = FilterCriteria {
        sort_order: SortOrder::Asc,
        limit: Some(1),
        ..FilterCriteria::default()
    };
    let oldest = &engine.query(&asc).unwrap()[0];
    albflow_storage::pagination::encode_cursor(oldest.timestamp, oldest.id)
}

#[test]
fn invalid_cursor_is_surfaced() {
    let engine = seeded_engine(3);
    let err = engine
        .query_cursor(
            &FilterCriteria::default(),
            Some("definitely-not-a-cursor"),
            10,
            CursorDirection::Forward,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        albflow_core::errors::StorageError::InvalidCursor { .. }
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// Safety caps & streaming
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn query_limit_is_capped() {
    let engine = seeded_engine(10);
    let filter = FilterCriteria {
        limit: Some(10_000_000),
        ..FilterCriteria::default()
    };
    let rows = engine.query(&filter).unwrap();
    assert!(rows.len() <= MAX_QUERY_ROWS);
}

#[test]
fn stream_query_delivers_all_batches_and_honours_abort() {
    let engine = seeded_engine(25);

    let mut batches = Vec::new();
    let delivered = engine
        .query_stream(&FilterCriteria::default(), 10, &mut |batch| {
            batches.push(batch.len());
            Ok(true)
        })
        .unwrap();
    assert_eq!(delivered, 25);
    assert_eq!(batches, vec![10, 10, 5]);

    let mut calls = 0;
    let delivered = engine
        .query_stream(&FilterCriteria::default(), 10, &mut |_batch| {
            calls += 1;
            Ok(false)
        })
        .unwrap();
    assert_eq!(calls, 1);
    assert_eq!(delivered, 10);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Maintenance & retention
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn index_lifecycle() {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    let before = engine.list_indexes().unwrap();
    assert!(before.contains(&"idx_log_entries_timestamp_id".to_string()));

    engine
        .create_index("idx_log_entries_domain_status", "log_entries", &["domain_name", "elb_status_code"])
        .unwrap();
    assert!(engine
        .list_indexes()
        .unwrap()
        .contains(&"idx_log_entries_domain_status".to_string()));

    engine.drop_index("idx_log_entries_domain_status").unwrap();
    assert_eq!(engine.list_indexes().unwrap(), before);

    engine.optimize_indexes().unwrap();

    let err = engine.create_index("bad name; --", "log_entries", &["id"]);
    assert!(err.is_err());
}

#[test]
fn stats_retention_and_clear() {
    let engine = seeded_engine(30);
    let stats = engine.get_stats().unwrap();
    assert_eq!(stats.log_entries, 30);
    assert!(stats.db_size_bytes > 0);

    let removed = engine
        .delete_older_than(base_time() + Duration::seconds(10))
        .unwrap();
    assert_eq!(removed, 10);
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 20);

    engine.clear_data().unwrap();
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 0);
}

#[test]
fn reopening_a_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("albflow.db");
    let config = albflow_core::config::DatabaseConfig::default();

    {
        let engine = LogStorageEngine::open(&path, &config).unwrap();
        engine
            .store(&[make_record(base_time(), "/persisted", 200, "203.0.113.12")])
            .unwrap();
        engine.destroy();
    }

    let engine = LogStorageEngine::open(&path, &config).unwrap();
    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Download-batch ledger
// ═══════════════════════════════════════════════════════════════════════════════

fn make_batch(batch_id: &str, keys: &[&str], status: BatchStatus) -> DownloadBatch {
    let now = Utc::now();
    DownloadBatch {
        batch_id: batch_id.to_string(),
        batch_name: format!("batch {batch_id}"),
        download_date: now,
        file_count: keys.len() as u32,
        total_size_bytes: 4096,
        s3_file_paths: keys.iter().map(|k| k.to_string()).collect(),
        local_file_paths: vec![],
        status,
        error_message: None,
        download_started_at: Some(now),
        download_completed_at: None,
        estimated_size_bytes: 4096,
        progress_percentage: 0.0,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn ledger_prefix_accounting() {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    engine
        .create_batch(&make_batch(
            "b1",
            &["s3://logs/prod/2023/a.gz", "s3://logs/prod/2023/b.gz"],
            BatchStatus::Downloading,
        ))
        .unwrap();
    engine
        .create_batch(&make_batch(
            "b2",
            &["staging/2023/c.gz"],
            BatchStatus::Downloading,
        ))
        .unwrap();

    assert_eq!(engine.get_file_count_by_prefix("prod/").unwrap(), 2);
    assert_eq!(engine.get_file_count_by_prefix("staging/").unwrap(), 1);
    assert_eq!(engine.get_file_count_by_prefix("nothing/").unwrap(), 0);

    assert!(engine.get_last_download_time("prod/").unwrap().is_none());
    engine
        .update_batch_status("b1", BatchStatus::Completed, None)
        .unwrap();
    assert!(engine.get_last_download_time("prod/").unwrap().is_some());
}

#[test]
fn ledger_enforces_lifecycle() {
    let engine = LogStorageEngine::open_in_memory().unwrap();
    engine
        .create_batch(&make_batch("b1", &["k/a.gz"], BatchStatus::Completed))
        .unwrap();

    engine
        .update_batch_status("b1", BatchStatus::Processing, None)
        .unwrap();
    engine
        .update_batch_status("b1", BatchStatus::Processed, None)
        .unwrap();
    assert_eq!(
        engine.get_batch("b1").unwrap().unwrap().status,
        BatchStatus::Processed
    );

    // Processed is terminal.
    assert!(engine
        .update_batch_status("b1", BatchStatus::Processing, None)
        .is_err());
    assert!(engine
        .update_batch_status("missing", BatchStatus::Error, None)
        .is_err());
}
