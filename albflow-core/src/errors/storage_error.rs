//! Storage-layer errors for SQLite operations.

/// Errors that can occur in the storage layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("connection error: {message}")]
    ConnectionError { message: String },

    #[error("query failed: {message} (sql: {sql})")]
    QueryError { sql: String, message: String },

    #[error("query timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid cursor: {cursor}")]
    InvalidCursor { cursor: String },

    #[error("migration failed at v{version:03}: {message}")]
    MigrationFailed { version: u32, message: String },

    #[error("connection pool exhausted: {in_use} in use, waited {waited_ms} ms")]
    PoolExhausted { in_use: usize, waited_ms: u64 },

    #[error("storage has been destroyed")]
    Destroyed,
}

impl StorageError {
    /// Wrap a rusqlite-level failure that has no statement context.
    pub fn connection(e: impl std::fmt::Display) -> Self {
        Self::ConnectionError {
            message: e.to_string(),
        }
    }

    /// Wrap a statement failure, keeping an excerpt of the offending SQL.
    pub fn query(sql: &str, e: impl std::fmt::Display) -> Self {
        Self::QueryError {
            sql: sql_excerpt(sql),
            message: e.to_string(),
        }
    }
}

/// First 120 chars of a statement, enough to identify it in logs.
fn sql_excerpt(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > 120 {
        format!("{}…", &flat[..120])
    } else {
        flat
    }
}
