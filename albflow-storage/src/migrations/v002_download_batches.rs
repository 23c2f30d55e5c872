//! v002: the download-batch ledger. Path lists are JSON-encoded TEXT.

use albflow_core::errors::StorageError;
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE download_batches (
            batch_id TEXT PRIMARY KEY,
            batch_name TEXT NOT NULL,
            download_date INTEGER NOT NULL,
            file_count INTEGER NOT NULL DEFAULT 0,
            total_size_bytes INTEGER NOT NULL DEFAULT 0,
            s3_file_paths TEXT NOT NULL DEFAULT '[]',
            local_file_paths TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            download_started_at INTEGER,
            download_completed_at INTEGER,
            estimated_size_bytes INTEGER NOT NULL DEFAULT 0,
            progress_percentage REAL NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX idx_download_batches_status ON download_batches (status);
        CREATE INDEX idx_download_batches_completed_at
            ON download_batches (download_completed_at);",
    )
    .map_err(StorageError::connection)
}
