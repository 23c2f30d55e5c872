//! v001: the raw log_entries table and its query indexes.
//!
//! Timestamps are INTEGER microseconds since the Unix epoch; the
//! composite `(timestamp, id)` index backs cursor pagination.

use albflow_core::errors::StorageError;
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE log_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            client_ip TEXT NOT NULL,
            client_port INTEGER NOT NULL DEFAULT 0,
            target_ip TEXT NOT NULL DEFAULT '',
            target_port INTEGER NOT NULL DEFAULT 0,
            request_processing_time REAL NOT NULL DEFAULT 0,
            target_processing_time REAL NOT NULL DEFAULT 0,
            response_processing_time REAL NOT NULL DEFAULT 0,
            elb_status_code INTEGER NOT NULL,
            target_status_code INTEGER NOT NULL DEFAULT 0,
            received_bytes INTEGER NOT NULL DEFAULT 0,
            sent_bytes INTEGER NOT NULL DEFAULT 0,
            request_verb TEXT NOT NULL,
            request_url TEXT NOT NULL,
            request_protocol TEXT NOT NULL,
            user_agent TEXT NOT NULL DEFAULT '',
            ssl_cipher TEXT NOT NULL DEFAULT '',
            ssl_protocol TEXT NOT NULL DEFAULT '',
            target_group_arn TEXT NOT NULL,
            trace_id TEXT NOT NULL,
            domain_name TEXT NOT NULL DEFAULT '',
            chosen_cert_arn TEXT NOT NULL DEFAULT '',
            matched_rule_priority INTEGER NOT NULL DEFAULT 0,
            request_creation_time INTEGER NOT NULL,
            actions_executed TEXT NOT NULL DEFAULT '',
            redirect_url TEXT NOT NULL DEFAULT '',
            error_reason TEXT NOT NULL DEFAULT '',
            target_port_list TEXT NOT NULL DEFAULT '',
            target_status_code_list TEXT NOT NULL DEFAULT '',
            classification TEXT NOT NULL DEFAULT '',
            classification_reason TEXT NOT NULL DEFAULT '',
            connection_id TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            CHECK (elb_status_code BETWEEN 100 AND 599)
        );

        CREATE INDEX idx_log_entries_timestamp ON log_entries (timestamp);
        CREATE INDEX idx_log_entries_request_url ON log_entries (request_url);
        CREATE INDEX idx_log_entries_elb_status_code ON log_entries (elb_status_code);
        CREATE INDEX idx_log_entries_timestamp_id ON log_entries (timestamp, id);",
    )
    .map_err(StorageError::connection)
}
