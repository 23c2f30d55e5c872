//! Migration runner — ledger-tracked, forward-only, transactional per
//! migration. The ledger records every executed migration's id, name and
//! execution time.

mod v001_log_entries;
mod v002_download_batches;
mod v003_summary_tables;

use albflow_core::errors::StorageError;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Total number of migrations.
pub const LATEST_VERSION: u32 = 3;

type MigrationFn = fn(&Connection) -> Result<(), StorageError>;

const MIGRATIONS: [(u32, &str, MigrationFn); 3] = [
    (1, "log_entries", v001_log_entries::migrate),
    (2, "download_batches", v002_download_batches::migrate),
    (3, "summary_tables", v003_summary_tables::migrate),
];

/// Highest executed migration id; 0 when the ledger doesn't exist yet.
pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
    let exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='migrations'")
        .and_then(|mut stmt| stmt.exists([]))
        .map_err(StorageError::connection)?;

    if !exists {
        return Ok(0);
    }

    conn.query_row("SELECT COALESCE(MAX(id), 0) FROM migrations", [], |row| {
        row.get(0)
    })
    .map_err(StorageError::connection)
}

/// Run all pending migrations. Forward-only, each wrapped in a
/// transaction together with its ledger entry.
pub fn run_migrations(conn: &Connection) -> Result<u32, StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            executed_at INTEGER NOT NULL
        )",
    )
    .map_err(StorageError::connection)?;

    let current = current_version(conn)?;
    if current >= LATEST_VERSION {
        debug!("database schema is up to date (v{current})");
        return Ok(0);
    }

    info!("running migrations: v{current} -> v{LATEST_VERSION}");
    let mut applied = 0;

    for &(version, name, migrate_fn) in &MIGRATIONS {
        if version <= current {
            continue;
        }

        debug!("applying migration v{version:03}: {name}");
        conn.execute_batch("BEGIN IMMEDIATE").map_err(|e| {
            StorageError::MigrationFailed {
                version,
                message: format!("begin transaction: {e}"),
            }
        })?;

        let outcome = migrate_fn(conn).and_then(|()| {
            conn.execute(
                "INSERT INTO migrations (id, name, executed_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![version, name, Utc::now().timestamp_micros()],
            )
            .map(|_| ())
            .map_err(StorageError::connection)
        });

        match outcome {
            Ok(()) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| StorageError::MigrationFailed {
                        version,
                        message: format!("commit: {e}"),
                    })?;
                info!("applied migration v{version:03}: {name}");
                applied += 1;
            }
            Err(e) => {
                warn!("migration v{version:03} failed: {e}, rolling back");
                let _ = conn.execute_batch("ROLLBACK");
                return Err(StorageError::MigrationFailed {
                    version,
                    message: e.to_string(),
                });
            }
        }
    }

    info!("applied {applied} migration(s), now at v{LATEST_VERSION}");
    Ok(applied)
}
