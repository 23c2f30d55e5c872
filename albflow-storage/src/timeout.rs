//! Per-query deadline enforcement.
//!
//! A progress handler on the connection interrupts the running statement
//! once the deadline passes; the resulting SQLITE_INTERRUPT surfaces as
//! `StorageError::Timeout`.

use std::time::{Duration, Instant};

use albflow_core::errors::StorageError;
use rusqlite::Connection;

/// VM instructions between deadline checks.
const PROGRESS_OPS: std::os::raw::c_int = 1_000;

/// Default per-query budget when the filter does not set one.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;

/// Run `f` with a deadline installed on the connection. The handler is
/// removed before returning, so pooled connections never carry one over.
pub fn with_timeout<T>(
    conn: &Connection,
    timeout_ms: u64,
    f: impl FnOnce(&Connection) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));

    let result = f(conn);
    conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);

    match result {
        Err(e) if is_interrupt(&e) => Err(StorageError::Timeout { timeout_ms }),
        other => other,
    }
}

fn is_interrupt(e: &StorageError) -> bool {
    match e {
        StorageError::QueryError { message, .. } | StorageError::ConnectionError { message } => {
            message.contains("interrupted")
        }
        _ => false,
    }
}
