//! v003: the four pre-aggregated summary tables maintained by the
//! aggregation engine.

use albflow_core::errors::StorageError;
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE hourly_summaries (
            hour_timestamp INTEGER NOT NULL,
            domain_name TEXT NOT NULL,
            request_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            avg_request_processing_time REAL NOT NULL DEFAULT 0,
            avg_target_processing_time REAL NOT NULL DEFAULT 0,
            avg_response_processing_time REAL NOT NULL DEFAULT 0,
            total_received_bytes INTEGER NOT NULL DEFAULT 0,
            total_sent_bytes INTEGER NOT NULL DEFAULT 0,
            unique_clients INTEGER NOT NULL DEFAULT 0,
            status_2xx INTEGER NOT NULL DEFAULT 0,
            status_3xx INTEGER NOT NULL DEFAULT 0,
            status_4xx INTEGER NOT NULL DEFAULT 0,
            status_5xx INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (hour_timestamp, domain_name)
        );

        CREATE TABLE url_pattern_summaries (
            normalized_url TEXT NOT NULL,
            domain_name TEXT NOT NULL,
            request_verb TEXT NOT NULL,
            request_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            avg_processing_ms REAL NOT NULL DEFAULT 0,
            max_processing_ms REAL NOT NULL DEFAULT 0,
            total_received_bytes INTEGER NOT NULL DEFAULT 0,
            total_sent_bytes INTEGER NOT NULL DEFAULT 0,
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            PRIMARY KEY (normalized_url, domain_name, request_verb)
        );

        CREATE TABLE session_summaries (
            client_ip TEXT NOT NULL,
            user_agent_bucket TEXT NOT NULL,
            session_date TEXT NOT NULL,
            total_requests INTEGER NOT NULL DEFAULT 0,
            unique_urls INTEGER NOT NULL DEFAULT 0,
            first_request_at INTEGER NOT NULL,
            last_request_at INTEGER NOT NULL,
            duration_seconds REAL NOT NULL DEFAULT 0,
            error_rate REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (client_ip, user_agent_bucket, session_date)
        );

        CREATE TABLE error_pattern_summaries (
            error_key TEXT NOT NULL,
            elb_status_code INTEGER NOT NULL,
            target_status_code INTEGER NOT NULL DEFAULT 0,
            error_reason TEXT NOT NULL DEFAULT '',
            normalized_url TEXT NOT NULL,
            occurrence_count INTEGER NOT NULL DEFAULT 0,
            affected_clients INTEGER NOT NULL DEFAULT 0,
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            PRIMARY KEY (error_key, elb_status_code, target_status_code,
                         error_reason, normalized_url)
        );

        CREATE INDEX idx_hourly_summaries_hour ON hourly_summaries (hour_timestamp);
        CREATE INDEX idx_session_summaries_date ON session_summaries (session_date);",
    )
    .map_err(StorageError::connection)
}
