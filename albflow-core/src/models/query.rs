//! Result envelopes for the storage query variants.

use serde::{Deserialize, Serialize};

/// Outcome of a (possibly chunked) batch insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchInsertResult {
    pub inserted: u64,
    pub failed: u64,
    pub errors: Vec<String>,
    pub processing_ms: u64,
}

impl BatchInsertResult {
    pub fn merge(&mut self, other: BatchInsertResult) {
        self.inserted += other.inserted;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

/// Offset-paginated query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_count: u64,
    pub total_pages: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorDirection {
    #[default]
    Forward,
    Backward,
}

/// Keyset-paginated query result. Cursors are opaque `"<rfc3339>|<id>"`
/// strings; a scan is stable across concurrent inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub has_more: bool,
    pub processing_ms: u64,
}

/// Row counts and physical size, for the host's monitoring endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub log_entries: u64,
    pub download_batches: u64,
    pub hourly_summaries: u64,
    pub url_pattern_summaries: u64,
    pub session_summaries: u64,
    pub error_pattern_summaries: u64,
    pub db_size_bytes: u64,
    pub indexes: Vec<String>,
}
