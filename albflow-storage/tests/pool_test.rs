//! Connection pool tests: growth to the maximum, waiter handoff,
//! acquire timeout, destroy semantics, and concurrent writes through the
//! engine.

use std::sync::Arc;
use std::time::Duration;

use albflow_core::config::PoolConfig;
use albflow_core::errors::StorageError;
use albflow_core::models::FilterCriteria;
use albflow_storage::{ConnectionPool, LogStorageEngine};

fn config(max_connections: usize, acquire_timeout_ms: u64) -> PoolConfig {
    PoolConfig {
        min_connections: 1,
        max_connections,
        acquire_timeout_ms,
        idle_timeout_ms: 300_000,
        test_on_borrow: true,
    }
}

#[test]
fn pool_grows_to_max_then_waiters_time_out() {
    let pool = ConnectionPool::open_in_memory(config(2, 100)).unwrap();

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let (idle, busy) = pool.size();
    assert_eq!((idle, busy), (0, 2));

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, StorageError::PoolExhausted { in_use: 2, .. }));

    drop(a);
    drop(b);
    let (idle, busy) = pool.size();
    assert_eq!((idle, busy), (2, 0));
}

#[test]
fn release_hands_the_connection_to_the_oldest_waiter() {
    let pool = Arc::new(ConnectionPool::open_in_memory(config(1, 5_000)).unwrap());
    let guard = pool.acquire().unwrap();

    let waiter_pool = pool.clone();
    let waiter = std::thread::spawn(move || {
        let conn = waiter_pool.acquire()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(StorageError::connection)
    });

    // Give the waiter time to park, then free the only connection.
    std::thread::sleep(Duration::from_millis(100));
    drop(guard);

    assert_eq!(waiter.join().unwrap().unwrap(), 1);
}

#[test]
fn destroy_fails_parked_waiters_and_later_acquires() {
    let pool = Arc::new(ConnectionPool::open_in_memory(config(1, 5_000)).unwrap());
    let guard = pool.acquire().unwrap();

    let waiter_pool = pool.clone();
    let waiter = std::thread::spawn(move || waiter_pool.acquire().map(|_| ()));

    std::thread::sleep(Duration::from_millis(100));
    pool.destroy();

    assert!(matches!(
        waiter.join().unwrap(),
        Err(StorageError::Destroyed)
    ));
    assert!(matches!(pool.acquire(), Err(StorageError::Destroyed)));
    drop(guard);
}

#[test]
fn concurrent_writers_serialize_through_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("concurrent.db");
    let engine = Arc::new(
        LogStorageEngine::open(&path, &albflow_core::config::DatabaseConfig::default()).unwrap(),
    );

    std::thread::scope(|scope| {
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                let record = sample_record(i);
                engine.store(&[record]).unwrap();
            });
        }
    });

    assert_eq!(engine.count(&FilterCriteria::default()).unwrap(), 8);
}

fn sample_record(i: i64) -> albflow_core::models::LogRecord {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    let timestamp =
        Utc.with_ymd_and_hms(2023, 12, 1, 10, 0, 0).unwrap() + Duration::seconds(i);
    albflow_core::models::LogRecord {
        id: 0,
        timestamp,
        client_ip: "203.0.113.12".parse().unwrap(),
        client_port: 40000,
        target_ip: None,
        target_port: 0,
        request_processing_time: 0.001,
        target_processing_time: 0.01,
        response_processing_time: 0.001,
        elb_status_code: 200,
        target_status_code: 200,
        received_bytes: 1,
        sent_bytes: 1,
        request_verb: "GET".to_string(),
        request_url: format!("/w/{i}"),
        request_protocol: "HTTP/1.1".to_string(),
        user_agent: String::new(),
        ssl_cipher: String::new(),
        ssl_protocol: String::new(),
        target_group_arn: "tg".to_string(),
        trace_id: "t".to_string(),
        domain_name: String::new(),
        chosen_cert_arn: String::new(),
        matched_rule_priority: 0,
        request_creation_time: timestamp,
        actions_executed: String::new(),
        redirect_url: String::new(),
        error_reason: String::new(),
        target_port_list: String::new(),
        target_status_code_list: String::new(),
        classification: String::new(),
        classification_reason: String::new(),
        connection_id: String::new(),
        created_at: DateTime::UNIX_EPOCH,
    }
}
