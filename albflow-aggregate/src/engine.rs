//! The aggregation engine: periodic upserts into the four summary tables.
//!
//! The hourly rollup is incremental from the newest already-aggregated
//! hour; the session, error-pattern and URL-pattern tables are rebuilt
//! over their full key space each run, which keeps re-running a no-op
//! (idempotent upsert-by-key).

use std::sync::Arc;
use std::time::Instant;

use albflow_core::errors::StorageError;
use albflow_core::models::{
    ErrorPatternSummary, HourlySummary, SessionSummary, UrlPatternSummary,
};
use albflow_storage::queries::summaries;
use albflow_storage::LogStorageEngine;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::normalize::UrlNormalizer;

/// Streamed scan size for the Rust-side normalising rollups.
const SCAN_BATCH: usize = 10_000;

/// Materialisation thresholds per table.
const MIN_URL_PATTERN_REQUESTS: u64 = 10;
const MIN_SESSION_REQUESTS: u64 = 5;
const MIN_ERROR_OCCURRENCES: u64 = 5;

/// Which summary tables a run refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Hourly table only — cheap enough to run continuously.
    Realtime,
    /// Hourly + session + error tables.
    Hourly,
    /// Everything, including the full URL-pattern rebuild.
    Daily,
}

/// Outcome of one table refresh.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub table: &'static str,
    /// Raw rows scanned.
    pub processed: u64,
    /// Summary rows written.
    pub updated: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    pub processed: u64,
    pub updated: u64,
    pub errors: Vec<String>,
    pub processing_ms: u64,
    pub tables: Vec<TableOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationStats {
    pub hourly_rows: u64,
    pub url_pattern_rows: u64,
    pub session_rows: u64,
    pub error_pattern_rows: u64,
    pub latest_hour: Option<DateTime<Utc>>,
}

pub struct AggregationEngine {
    engine: Arc<LogStorageEngine>,
    normalizer: UrlNormalizer,
}

impl AggregationEngine {
    pub fn new(engine: Arc<LogStorageEngine>) -> Self {
        Self {
            engine,
            normalizer: UrlNormalizer::new(),
        }
    }

    /// Run the schedule's tasks. Table failures are collected per table;
    /// the remaining tables still run.
    pub fn run(
        &self,
        since: Option<DateTime<Utc>>,
        schedule: Schedule,
    ) -> Result<AggregationReport, StorageError> {
        let started = Instant::now();
        let mut report = AggregationReport::default();

        type Task<'a> = (&'static str, Box<dyn Fn() -> Result<(u64, u64), StorageError> + 'a>);
        let mut tasks: Vec<Task<'_>> = vec![(
            "hourly_summaries",
            Box::new(move || self.aggregate_hourly(since)),
        )];
        if matches!(schedule, Schedule::Hourly | Schedule::Daily) {
            tasks.push(("session_summaries", Box::new(|| self.rebuild_sessions())));
            tasks.push((
                "error_pattern_summaries",
                Box::new(|| self.rebuild_error_patterns()),
            ));
        }
        if matches!(schedule, Schedule::Daily) {
            tasks.push((
                "url_pattern_summaries",
                Box::new(|| self.rebuild_url_patterns()),
            ));
        }

        for (table, task) in tasks {
            match task() {
                Ok((processed, updated)) => {
                    report.processed += processed;
                    report.updated += updated;
                    report.tables.push(TableOutcome {
                        table,
                        processed,
                        updated,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("aggregation of {table} failed: {e}");
                    report.errors.push(format!("{table}: {e}"));
                    report.tables.push(TableOutcome {
                        table,
                        processed: 0,
                        updated: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report.processing_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = report.processed,
            updated = report.updated,
            errors = report.errors.len(),
            ms = report.processing_ms,
            "aggregation run finished"
        );
        Ok(report)
    }

    /// Delete hourly rows and session rows older than `older_than`;
    /// returns total rows removed.
    pub fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, StorageError> {
        let removed = self
            .engine
            .with_conn(|conn| summaries::cleanup_before(conn, older_than))?;
        info!("aggregation cleanup removed {removed} summary rows");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<AggregationStats, StorageError> {
        self.engine.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let sql = format!("SELECT COUNT(*) FROM {table}");
                conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| StorageError::query(&sql, e))
            };
            Ok(AggregationStats {
                hourly_rows: count("hourly_summaries")?,
                url_pattern_rows: count("url_pattern_summaries")?,
                session_rows: count("session_summaries")?,
                error_pattern_rows: count("error_pattern_summaries")?,
                latest_hour: summaries::max_hourly_timestamp(conn)?,
            })
        })
    }

    // ─── Hourly rollup (incremental) ─────────────────────────────────────

    fn aggregate_hourly(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<(u64, u64), StorageError> {
        self.engine.with_conn(|conn| {
            // Re-aggregate from the newest summarised hour: that hour may
            // have been partial when last written, and the upsert is
            // keyed, so rewriting it is safe.
            let since_micros = match since {
                Some(t) => t.timestamp_micros(),
                None => summaries::max_hourly_timestamp(conn)?
                    .map(|t| t.timestamp_micros())
                    .unwrap_or(0),
            };

            let sql = "SELECT (timestamp / 3600000000) * 3600000000 AS hour_ts,
                    domain_name,
                    COUNT(*),
                    SUM(CASE WHEN elb_status_code >= 400 THEN 1 ELSE 0 END),
                    AVG(request_processing_time),
                    AVG(target_processing_time),
                    AVG(response_processing_time),
                    SUM(received_bytes),
                    SUM(sent_bytes),
                    COUNT(DISTINCT client_ip),
                    SUM(CASE WHEN elb_status_code BETWEEN 200 AND 299 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN elb_status_code BETWEEN 300 AND 399 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN elb_status_code BETWEEN 400 AND 499 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN elb_status_code BETWEEN 500 AND 599 THEN 1 ELSE 0 END)
                 FROM log_entries
                 WHERE timestamp >= ?1
                 GROUP BY hour_ts, domain_name";

            let updated_at = Utc::now();
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| StorageError::query(sql, e))?;
            let rows = stmt
                .query_map(rusqlite::params![since_micros], |row| {
                    let hour_micros: i64 = row.get(0)?;
                    Ok(HourlySummary {
                        hour_timestamp: DateTime::from_timestamp_micros(hour_micros)
                            .unwrap_or(DateTime::UNIX_EPOCH),
                        domain_name: row.get(1)?,
                        request_count: row.get::<_, i64>(2)? as u64,
                        error_count: row.get::<_, i64>(3)? as u64,
                        avg_request_processing_time: row.get(4)?,
                        avg_target_processing_time: row.get(5)?,
                        avg_response_processing_time: row.get(6)?,
                        total_received_bytes: row.get::<_, i64>(7)? as u64,
                        total_sent_bytes: row.get::<_, i64>(8)? as u64,
                        unique_clients: row.get::<_, i64>(9)? as u64,
                        status_2xx: row.get::<_, i64>(10)? as u64,
                        status_3xx: row.get::<_, i64>(11)? as u64,
                        status_4xx: row.get::<_, i64>(12)? as u64,
                        status_5xx: row.get::<_, i64>(13)? as u64,
                        updated_at,
                    })
                })
                .map_err(|e| StorageError::query(sql, e))?;

            let mut summaries_out = Vec::new();
            for row in rows {
                summaries_out.push(row.map_err(|e| StorageError::query(sql, e))?);
            }

            let processed: u64 = summaries_out.iter().map(|s| s.request_count).sum();
            let updated = summaries::upsert_hourly(conn, &summaries_out)? as u64;
            debug!("hourly rollup: {processed} rows into {updated} buckets");
            Ok((processed, updated))
        })
    }

    // ─── Session rollup (full rebuild) ───────────────────────────────────

    fn rebuild_sessions(&self) -> Result<(u64, u64), StorageError> {
        self.engine.with_conn(|conn| {
            let sql = "SELECT client_ip,
                    substr(user_agent, 1, 32) AS ua_bucket,
                    date(timestamp / 1000000, 'unixepoch') AS session_date,
                    COUNT(*),
                    COUNT(DISTINCT request_url),
                    MIN(timestamp),
                    MAX(timestamp),
                    AVG(CASE WHEN elb_status_code >= 400 THEN 1.0 ELSE 0.0 END)
                 FROM log_entries
                 GROUP BY client_ip, ua_bucket, session_date
                 HAVING COUNT(*) >= ?1";

            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| StorageError::query(sql, e))?;
            let rows = stmt
                .query_map(rusqlite::params![MIN_SESSION_REQUESTS], |row| {
                    let date: String = row.get(2)?;
                    let session_date: NaiveDate = date.parse().map_err(|_| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            format!("bad date {date:?}").into(),
                        )
                    })?;
                    let first: i64 = row.get(5)?;
                    let last: i64 = row.get(6)?;
                    Ok(SessionSummary {
                        client_ip: row.get(0)?,
                        user_agent_bucket: row.get(1)?,
                        session_date,
                        total_requests: row.get::<_, i64>(3)? as u64,
                        unique_urls: row.get::<_, i64>(4)? as u64,
                        first_request_at: DateTime::from_timestamp_micros(first)
                            .unwrap_or(DateTime::UNIX_EPOCH),
                        last_request_at: DateTime::from_timestamp_micros(last)
                            .unwrap_or(DateTime::UNIX_EPOCH),
                        duration_seconds: (last - first) as f64 / 1_000_000.0,
                        error_rate: row.get(7)?,
                    })
                })
                .map_err(|e| StorageError::query(sql, e))?;

            let mut groups = Vec::new();
            for row in rows {
                groups.push(row.map_err(|e| StorageError::query(sql, e))?);
            }

            let processed: u64 = groups.iter().map(|g| g.total_requests).sum();
            let updated = summaries::upsert_sessions(conn, &groups)? as u64;
            debug!("session rollup: {} groups materialised", updated);
            Ok((processed, updated))
        })
    }

    // ─── Error-pattern rollup (full rebuild, normalised in Rust) ─────────

    fn rebuild_error_patterns(&self) -> Result<(u64, u64), StorageError> {
        struct Acc {
            count: u64,
            clients: FxHashSet<String>,
            first_seen: i64,
            last_seen: i64,
        }

        self.engine.with_conn(|conn| {
            let sql = "SELECT error_reason, elb_status_code, target_status_code,
                    request_url, client_ip, timestamp
                 FROM log_entries WHERE elb_status_code >= 400";
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| StorageError::query(sql, e))?;

            let mut groups: FxHashMap<(String, u16, u16, String, String), Acc> =
                FxHashMap::default();
            let mut processed = 0u64;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as u16,
                        row.get::<_, i64>(2)? as u16,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(|e| StorageError::query(sql, e))?;

            for row in rows {
                let (reason, elb_status, target_status, url, client_ip, ts) =
                    row.map_err(|e| StorageError::query(sql, e))?;
                processed += 1;
                let key = (
                    ErrorPatternSummary::key_for(&reason, elb_status),
                    elb_status,
                    target_status,
                    reason,
                    self.normalizer.normalize(&url),
                );
                let acc = groups.entry(key).or_insert(Acc {
                    count: 0,
                    clients: FxHashSet::default(),
                    first_seen: ts,
                    last_seen: ts,
                });
                acc.count += 1;
                acc.clients.insert(client_ip);
                acc.first_seen = acc.first_seen.min(ts);
                acc.last_seen = acc.last_seen.max(ts);
            }

            let rows_out: Vec<ErrorPatternSummary> = groups
                .into_iter()
                .filter(|(_, acc)| acc.count >= MIN_ERROR_OCCURRENCES)
                .map(|((error_key, elb_status, target_status, reason, url), acc)| {
                    ErrorPatternSummary {
                        error_key,
                        elb_status_code: elb_status,
                        target_status_code: target_status,
                        error_reason: reason,
                        normalized_url: url,
                        occurrence_count: acc.count,
                        affected_clients: acc.clients.len() as u64,
                        first_seen: DateTime::from_timestamp_micros(acc.first_seen)
                            .unwrap_or(DateTime::UNIX_EPOCH),
                        last_seen: DateTime::from_timestamp_micros(acc.last_seen)
                            .unwrap_or(DateTime::UNIX_EPOCH),
                    }
                })
                .collect();

            let updated = summaries::upsert_error_patterns(conn, &rows_out)? as u64;
            debug!("error-pattern rollup: {processed} error rows into {updated} patterns");
            Ok((processed, updated))
        })
    }

    // ─── URL-pattern rollup (full rebuild, streamed + normalised) ────────

    fn rebuild_url_patterns(&self) -> Result<(u64, u64), StorageError> {
        struct Acc {
            count: u64,
            errors: u64,
            total_ms: f64,
            max_ms: f64,
            received: u64,
            sent: u64,
            first_seen: i64,
            last_seen: i64,
        }

        self.engine.with_conn(|conn| {
            let mut groups: FxHashMap<(String, String, String), Acc> = FxHashMap::default();
            let mut processed = 0u64;
            let mut offset = 0usize;

            loop {
                let batch = scan_url_batch(conn, offset, SCAN_BATCH)?;
                let len = batch.len();
                for row in batch {
                    processed += 1;
                    let total_ms = (row.request_s + row.target_s + row.response_s) * 1000.0;
                    let key = (
                        self.normalizer.normalize(&row.url),
                        row.domain,
                        row.verb,
                    );
                    let acc = groups.entry(key).or_insert(Acc {
                        count: 0,
                        errors: 0,
                        total_ms: 0.0,
                        max_ms: 0.0,
                        received: 0,
                        sent: 0,
                        first_seen: row.ts,
                        last_seen: row.ts,
                    });
                    acc.count += 1;
                    if row.status >= 400 {
                        acc.errors += 1;
                    }
                    acc.total_ms += total_ms;
                    acc.max_ms = acc.max_ms.max(total_ms);
                    acc.received += row.received;
                    acc.sent += row.sent;
                    acc.first_seen = acc.first_seen.min(row.ts);
                    acc.last_seen = acc.last_seen.max(row.ts);
                }
                if len < SCAN_BATCH {
                    break;
                }
                offset += len;
            }

            let rows_out: Vec<UrlPatternSummary> = groups
                .into_iter()
                .filter(|(_, acc)| acc.count >= MIN_URL_PATTERN_REQUESTS)
                .map(|((url, domain, verb), acc)| UrlPatternSummary {
                    normalized_url: url,
                    domain_name: domain,
                    request_verb: verb,
                    request_count: acc.count,
                    error_count: acc.errors,
                    avg_processing_ms: acc.total_ms / acc.count as f64,
                    max_processing_ms: acc.max_ms,
                    total_received_bytes: acc.received,
                    total_sent_bytes: acc.sent,
                    first_seen: DateTime::from_timestamp_micros(acc.first_seen)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                    last_seen: DateTime::from_timestamp_micros(acc.last_seen)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                })
                .collect();

            let updated = summaries::upsert_url_patterns(conn, &rows_out)? as u64;
            debug!("url-pattern rollup: {processed} rows into {updated} patterns");
            Ok((processed, updated))
        })
    }
}

struct UrlScanRow {
    url: String,
    domain: String,
    verb: String,
    status: u16,
    request_s: f64,
    target_s: f64,
    response_s: f64,
    received: u64,
    sent: u64,
    ts: i64,
}

fn scan_url_batch(
    conn: &Connection,
    offset: usize,
    limit: usize,
) -> Result<Vec<UrlScanRow>, StorageError> {
    let sql = "SELECT request_url, domain_name, request_verb, elb_status_code,
            request_processing_time, target_processing_time, response_processing_time,
            received_bytes, sent_bytes, timestamp
         FROM log_entries ORDER BY id LIMIT ?1 OFFSET ?2";
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
    let rows = stmt
        .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
            Ok(UrlScanRow {
                url: row.get(0)?,
                domain: row.get(1)?,
                verb: row.get(2)?,
                status: row.get::<_, i64>(3)? as u16,
                request_s: row.get(4)?,
                target_s: row.get(5)?,
                response_s: row.get(6)?,
                received: row.get::<_, i64>(7)? as u64,
                sent: row.get::<_, i64>(8)? as u64,
                ts: row.get(9)?,
            })
        })
        .map_err(|e| StorageError::query(sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(sql, e))?);
    }
    Ok(result)
}
