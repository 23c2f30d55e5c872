//! `LogStorageEngine` — the single owner of the connection pool.
//!
//! All reads and writes go through `with_conn`; no code outside this
//! crate touches a raw `Connection` for albflow.db operations except the
//! aggregation engine, which borrows one through `with_conn` as well.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use albflow_core::config::{DatabaseConfig, PoolConfig};
use albflow_core::errors::StorageError;
use albflow_core::models::{
    BatchInsertResult, BatchStatus, CursorDirection, CursorPage, DownloadBatch, FilterCriteria,
    HourlySummary, LogRecord, Paginated, StorageStats,
};
use albflow_core::traits::{IAnalyticsStore, IBatchLedger, ILogEntryStore, RecordSink};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::migrations;
use crate::pagination::{
    decode_cursor, encode_cursor, CursorKey, MAX_CURSOR_LIMIT, MAX_PAGE_SIZE, MAX_QUERY_ROWS,
};
use crate::pool::ConnectionPool;
use crate::queries::{batches, log_entries, summaries};
use crate::timeout::{with_timeout, DEFAULT_QUERY_TIMEOUT_MS};

/// Default records per insert transaction.
const DEFAULT_BATCH_SIZE: usize = 1_000;

/// The pooled SQLite storage engine.
pub struct LogStorageEngine {
    pool: Arc<ConnectionPool>,
    default_batch_size: usize,
}

impl LogStorageEngine {
    /// Open a file-backed engine. Runs migrations and applies pragmas.
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = ConnectionPool::open(path, config.pool.clone())?;
        Self::finish_open(pool)
    }

    /// Open an in-memory engine (tests; every pooled connection shares
    /// one database).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let pool = ConnectionPool::open_in_memory(PoolConfig::default())?;
        Self::finish_open(pool)
    }

    fn finish_open(pool: ConnectionPool) -> Result<Self, StorageError> {
        let engine = Self {
            pool: Arc::new(pool),
            default_batch_size: DEFAULT_BATCH_SIZE,
        };
        engine.with_conn(|conn| migrations::run_migrations(conn).map(|_| ()))?;
        Ok(engine)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Fail pending waiters and close every connection.
    pub fn destroy(&self) {
        self.pool.destroy();
    }

    /// Borrow a pooled connection for the duration of `f`.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.pool.acquire()?;
        f(&conn)
    }

    fn timeout_for(filter: &FilterCriteria) -> u64 {
        filter.timeout_ms.unwrap_or(DEFAULT_QUERY_TIMEOUT_MS)
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Chunked transactional insert with the default chunk size.
    pub fn store(&self, records: &[LogRecord]) -> Result<BatchInsertResult, StorageError> {
        self.store_batch(records, self.default_batch_size)
    }

    /// Insert in chunks of `batch_size`, one transaction per chunk. A
    /// failed chunk rolls back, is tallied, and the rest still attempt.
    pub fn store_batch(
        &self,
        records: &[LogRecord],
        batch_size: usize,
    ) -> Result<BatchInsertResult, StorageError> {
        let started = Instant::now();
        let batch_size = batch_size.max(1);
        let mut result = BatchInsertResult::default();

        for chunk in records.chunks(batch_size) {
            match self.insert_chunk(chunk) {
                Ok(n) => result.inserted += n as u64,
                Err(e) => {
                    warn!("insert chunk of {} records failed: {e}", chunk.len());
                    result.failed += chunk.len() as u64;
                    result.errors.push(e.to_string());
                }
            }
        }

        result.processing_ms = started.elapsed().as_millis() as u64;
        debug!(
            inserted = result.inserted,
            failed = result.failed,
            ms = result.processing_ms,
            "batch insert finished"
        );
        Ok(result)
    }

    fn insert_chunk(&self, chunk: &[LogRecord]) -> Result<usize, StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(StorageError::connection)?;
            match log_entries::insert_records(conn, chunk, Utc::now()) {
                Ok(n) => {
                    conn.execute_batch("COMMIT")
                        .map_err(StorageError::connection)?;
                    Ok(n)
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(e)
                }
            }
        })
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// Filtered query. The requested limit is clamped to
    /// `MAX_QUERY_ROWS` and the query runs under the filter's timeout.
    pub fn query(&self, filter: &FilterCriteria) -> Result<Vec<LogRecord>, StorageError> {
        let limit = filter
            .limit
            .unwrap_or(MAX_QUERY_ROWS)
            .min(filter.max_rows.unwrap_or(MAX_QUERY_ROWS))
            .min(MAX_QUERY_ROWS);
        let offset = filter.offset.unwrap_or(0);
        let timeout_ms = Self::timeout_for(filter);

        self.with_conn(|conn| {
            with_timeout(conn, timeout_ms, |conn| {
                log_entries::select(conn, filter, limit, offset)
            })
        })
    }

    pub fn count(&self, filter: &FilterCriteria) -> Result<u64, StorageError> {
        let timeout_ms = Self::timeout_for(filter);
        self.with_conn(|conn| {
            with_timeout(conn, timeout_ms, |conn| log_entries::count(conn, filter))
        })
    }

    /// Offset pagination; `page` is 1-based and `page_size` is clamped
    /// to 1000.
    pub fn query_paginated(
        &self,
        filter: &FilterCriteria,
        page: usize,
        page_size: usize,
    ) -> Result<Paginated<LogRecord>, StorageError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let timeout_ms = Self::timeout_for(filter);

        let (total_count, data) = self.with_conn(|conn| {
            with_timeout(conn, timeout_ms, |conn| {
                let total = log_entries::count(conn, filter)?;
                let data =
                    log_entries::select(conn, filter, page_size, (page - 1) * page_size)?;
                Ok((total, data))
            })
        })?;

        let total_pages = (total_count as usize).div_ceil(page_size);
        Ok(Paginated {
            data,
            page,
            page_size,
            total_count,
            total_pages,
            has_more: page < total_pages,
        })
    }

    /// Keyset pagination. Forward scans `timestamp DESC, id DESC`
    /// strictly below the cursor; backward scans ascending strictly
    /// above it. Fetches limit+1 to learn `has_more`.
    pub fn query_cursor(
        &self,
        filter: &FilterCriteria,
        cursor: Option<&str>,
        limit: usize,
        direction: CursorDirection,
    ) -> Result<CursorPage<LogRecord>, StorageError> {
        let started = Instant::now();
        let limit = limit.clamp(1, MAX_CURSOR_LIMIT);
        let key: Option<CursorKey> = cursor.map(decode_cursor).transpose()?;
        let descending = matches!(direction, CursorDirection::Forward);
        let timeout_ms = Self::timeout_for(filter);

        let mut data = self.with_conn(|conn| {
            with_timeout(conn, timeout_ms, |conn| {
                log_entries::select_keyset(conn, filter, key, limit + 1, descending)
            })
        })?;

        let has_more = data.len() > limit;
        data.truncate(limit);

        let next_cursor = if has_more {
            data.last().map(|r| encode_cursor(r.timestamp, r.id))
        } else {
            None
        };
        let prev_cursor = if cursor.is_some() {
            data.first().map(|r| encode_cursor(r.timestamp, r.id))
        } else {
            None
        };

        Ok(CursorPage {
            data,
            next_cursor,
            prev_cursor,
            has_more,
            processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Batched offset scan feeding `sink`; stops on a short batch, a
    /// `false` from the sink, or an error thrown by the sink.
    pub fn query_stream(
        &self,
        filter: &FilterCriteria,
        batch_size: usize,
        sink: &mut RecordSink<'_>,
    ) -> Result<u64, StorageError> {
        let batch_size = batch_size.max(1);
        let base_offset = filter.offset.unwrap_or(0);
        let timeout_ms = Self::timeout_for(filter);
        let mut delivered = 0u64;

        let conn = self.pool.acquire()?;
        for batch_index in 0.. {
            let offset = base_offset + batch_index * batch_size;
            let batch = with_timeout(&conn, timeout_ms, |conn| {
                log_entries::select(conn, filter, batch_size, offset)
            })?;

            let len = batch.len();
            if len > 0 {
                delivered += len as u64;
                if !sink(batch)? {
                    break;
                }
            }
            if len < batch_size {
                break;
            }
        }
        Ok(delivered)
    }

    /// Fast path over the hourly summary table, newest hour first.
    pub fn query_aggregated(
        &self,
        filter: &FilterCriteria,
    ) -> Result<Vec<HourlySummary>, StorageError> {
        let timeout_ms = Self::timeout_for(filter);
        self.with_conn(|conn| {
            with_timeout(conn, timeout_ms, |conn| summaries::select_hourly(conn, filter))
        })
    }

    // ─── Maintenance ─────────────────────────────────────────────────────

    /// Create a secondary index. Identifiers are validated, not quoted.
    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: &[&str],
    ) -> Result<(), StorageError> {
        validate_identifier(name)?;
        validate_identifier(table)?;
        for column in columns {
            validate_identifier(column)?;
        }
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {table} ({})",
            columns.join(", ")
        );
        self.with_conn(|conn| {
            conn.execute_batch(&sql)
                .map_err(|e| StorageError::query(&sql, e))
        })?;
        info!("created index {name} on {table}");
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<(), StorageError> {
        validate_identifier(name)?;
        let sql = format!("DROP INDEX IF EXISTS {name}");
        self.with_conn(|conn| {
            conn.execute_batch(&sql)
                .map_err(|e| StorageError::query(&sql, e))
        })
    }

    pub fn list_indexes(&self) -> Result<Vec<String>, StorageError> {
        let sql = "SELECT name FROM sqlite_master
             WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name";
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| StorageError::query(sql, e))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row.map_err(|e| StorageError::query(sql, e))?);
            }
            Ok(names)
        })
    }

    /// Refresh the query planner's statistics.
    pub fn optimize_indexes(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch("ANALYZE")
                .map_err(StorageError::connection)
        })
    }

    /// Reclaim free pages. A no-op signal on engines that autovacuum.
    pub fn vacuum(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch("VACUUM")
                .map_err(StorageError::connection)
        })
    }

    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let indexes = self.list_indexes()?;
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let sql = format!("SELECT COUNT(*) FROM {table}");
                conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| StorageError::query(&sql, e))
            };
            let page_count: i64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .map_err(StorageError::connection)?;
            let page_size: i64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .map_err(StorageError::connection)?;

            Ok(StorageStats {
                log_entries: count("log_entries")?,
                download_batches: count("download_batches")?,
                hourly_summaries: count("hourly_summaries")?,
                url_pattern_summaries: count("url_pattern_summaries")?,
                session_summaries: count("session_summaries")?,
                error_pattern_summaries: count("error_pattern_summaries")?,
                db_size_bytes: (page_count * page_size) as u64,
                indexes,
            })
        })
    }

    /// Remove every row from every table. Irreversible.
    pub fn clear_data(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "DELETE FROM log_entries;
                 DELETE FROM download_batches;
                 DELETE FROM hourly_summaries;
                 DELETE FROM url_pattern_summaries;
                 DELETE FROM session_summaries;
                 DELETE FROM error_pattern_summaries;",
            )
            .map_err(StorageError::connection)
        })
    }

    /// Delete raw entries older than `cutoff`; returns rows removed.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let removed =
            self.with_conn(|conn| log_entries::delete_older_than(conn, cutoff))?;
        info!("retention removed {removed} log entries older than {cutoff}");
        Ok(removed)
    }

    // ─── Download-batch accounting ───────────────────────────────────────

    /// Count ledger S3 keys under `prefix` across all batches.
    pub fn get_file_count_by_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let rows = self.with_conn(batches::all_key_rows)?;
        let count = rows
            .iter()
            .flat_map(|(keys, _)| keys.iter())
            .filter(|key| strip_bucket(key).starts_with(prefix))
            .count();
        Ok(count as u64)
    }

    /// Completion time of the newest completed batch holding a key under
    /// `prefix`.
    pub fn get_last_download_time(
        &self,
        prefix: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let rows = self.with_conn(batches::all_key_rows)?;
        Ok(rows
            .into_iter()
            .filter_map(|(keys, completed)| {
                let matches = keys.iter().any(|k| strip_bucket(k).starts_with(prefix));
                completed.filter(|_| matches)
            })
            .max())
    }
}

/// Strip an optional `s3://bucket/` prefix, leaving the object key.
fn strip_bucket(key: &str) -> &str {
    match key.strip_prefix("s3://") {
        Some(rest) => rest.split_once('/').map(|(_, k)| k).unwrap_or(""),
        None => key,
    }
}

fn validate_identifier(name: &str) -> Result<(), StorageError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::QueryError {
            sql: String::new(),
            message: format!("invalid identifier {name:?}"),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Trait implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl ILogEntryStore for LogStorageEngine {
    fn store(&self, records: &[LogRecord]) -> Result<BatchInsertResult, StorageError> {
        LogStorageEngine::store(self, records)
    }

    fn store_batch(
        &self,
        records: &[LogRecord],
        batch_size: usize,
    ) -> Result<BatchInsertResult, StorageError> {
        LogStorageEngine::store_batch(self, records, batch_size)
    }

    fn count(&self, filter: &FilterCriteria) -> Result<u64, StorageError> {
        LogStorageEngine::count(self, filter)
    }
}

impl IAnalyticsStore for LogStorageEngine {
    fn count(&self, filter: &FilterCriteria) -> Result<u64, StorageError> {
        LogStorageEngine::count(self, filter)
    }

    fn query(&self, filter: &FilterCriteria) -> Result<Vec<LogRecord>, StorageError> {
        LogStorageEngine::query(self, filter)
    }

    fn query_stream(
        &self,
        filter: &FilterCriteria,
        batch_size: usize,
        sink: &mut RecordSink<'_>,
    ) -> Result<u64, StorageError> {
        LogStorageEngine::query_stream(self, filter, batch_size, sink)
    }

    fn query_aggregated(
        &self,
        filter: &FilterCriteria,
    ) -> Result<Vec<HourlySummary>, StorageError> {
        LogStorageEngine::query_aggregated(self, filter)
    }
}

impl IBatchLedger for LogStorageEngine {
    fn create_batch(&self, batch: &DownloadBatch) -> Result<(), StorageError> {
        self.with_conn(|conn| batches::insert_batch(conn, batch))
    }

    fn get_batch(&self, batch_id: &str) -> Result<Option<DownloadBatch>, StorageError> {
        self.with_conn(|conn| batches::get_batch(conn, batch_id))
    }

    fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let current = batches::get_batch(conn, batch_id)?.ok_or_else(|| {
                StorageError::QueryError {
                    sql: String::new(),
                    message: format!("batch not found: {batch_id}"),
                }
            })?;
            if current.status != status && !current.status.can_transition_to(status) {
                return Err(StorageError::QueryError {
                    sql: String::new(),
                    message: format!(
                        "illegal batch transition {} -> {} for {batch_id}",
                        current.status.as_str(),
                        status.as_str()
                    ),
                });
            }
            batches::update_status(conn, batch_id, status, error_message)?;
            Ok(())
        })
    }

    fn file_count_by_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        self.get_file_count_by_prefix(prefix)
    }

    fn last_download_time(&self, prefix: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.get_last_download_time(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::strip_bucket;

    #[test]
    fn strips_bucket_prefix() {
        assert_eq!(strip_bucket("s3://logs/2023/12/file.gz"), "2023/12/file.gz");
        assert_eq!(strip_bucket("2023/12/file.gz"), "2023/12/file.gz");
        assert_eq!(strip_bucket("s3://bare-bucket"), "");
    }
}
