//! Typed readers and upsert writers for the four summary tables.

use albflow_core::errors::StorageError;
use albflow_core::models::{
    ErrorPatternSummary, FilterCriteria, HourlySummary, SessionSummary, UrlPatternSummary,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection};

use super::log_entries::micros_to_datetime;

// ─── Hourly ──────────────────────────────────────────────────────────────────

const HOURLY_COLUMNS: &str = "hour_timestamp, domain_name, request_count, error_count,
     avg_request_processing_time, avg_target_processing_time,
     avg_response_processing_time, total_received_bytes, total_sent_bytes,
     unique_clients, status_2xx, status_3xx, status_4xx, status_5xx, updated_at";

/// Aggregated fast path: hourly rows matching the filter's time range and
/// domains, newest hour first.
pub fn select_hourly(
    conn: &Connection,
    filter: &FilterCriteria,
) -> Result<Vec<HourlySummary>, StorageError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut params_vec: Vec<Value> = Vec::new();

    if let Some(range) = &filter.time_range {
        conditions.push("hour_timestamp BETWEEN ? AND ?".to_string());
        params_vec.push(Value::Integer(range.start.timestamp_micros()));
        params_vec.push(Value::Integer(range.end.timestamp_micros()));
    }
    if !filter.domain_names.is_empty() {
        let placeholders = vec!["?"; filter.domain_names.len()].join(", ");
        conditions.push(format!("domain_name IN ({placeholders})"));
        params_vec.extend(filter.domain_names.iter().cloned().map(Value::Text));
    }

    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let sql = format!(
        "SELECT {HOURLY_COLUMNS} FROM hourly_summaries{where_sql}
         ORDER BY hour_timestamp DESC, domain_name"
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::query(&sql, e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params_vec), map_hourly_row)
        .map_err(|e| StorageError::query(&sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(&sql, e))?);
    }
    Ok(result)
}

pub fn upsert_hourly(conn: &Connection, rows: &[HourlySummary]) -> Result<usize, StorageError> {
    let sql = format!(
        "INSERT OR REPLACE INTO hourly_summaries ({HOURLY_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| StorageError::query(&sql, e))?;

    for row in rows {
        stmt.execute(params![
            row.hour_timestamp.timestamp_micros(),
            row.domain_name,
            row.request_count as i64,
            row.error_count as i64,
            row.avg_request_processing_time,
            row.avg_target_processing_time,
            row.avg_response_processing_time,
            row.total_received_bytes as i64,
            row.total_sent_bytes as i64,
            row.unique_clients as i64,
            row.status_2xx as i64,
            row.status_3xx as i64,
            row.status_4xx as i64,
            row.status_5xx as i64,
            row.updated_at.timestamp_micros(),
        ])
        .map_err(|e| StorageError::query(&sql, e))?;
    }
    Ok(rows.len())
}

pub fn max_hourly_timestamp(conn: &Connection) -> Result<Option<DateTime<Utc>>, StorageError> {
    let sql = "SELECT MAX(hour_timestamp) FROM hourly_summaries";
    let max: Option<i64> = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(|e| StorageError::query(sql, e))?;
    Ok(max.and_then(DateTime::from_timestamp_micros))
}

fn map_hourly_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HourlySummary> {
    Ok(HourlySummary {
        hour_timestamp: micros_to_datetime(row, 0)?,
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
        updated_at: micros_to_datetime(row, 14)?,
    })
}

// ─── URL patterns ────────────────────────────────────────────────────────────

pub fn upsert_url_patterns(
    conn: &Connection,
    rows: &[UrlPatternSummary],
) -> Result<usize, StorageError> {
    let sql = "INSERT OR REPLACE INTO url_pattern_summaries
         (normalized_url, domain_name, request_verb, request_count, error_count,
          avg_processing_ms, max_processing_ms, total_received_bytes,
          total_sent_bytes, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| StorageError::query(sql, e))?;

    for row in rows {
        stmt.execute(params![
            row.normalized_url,
            row.domain_name,
            row.request_verb,
            row.request_count as i64,
            row.error_count as i64,
            row.avg_processing_ms,
            row.max_processing_ms,
            row.total_received_bytes as i64,
            row.total_sent_bytes as i64,
            row.first_seen.timestamp_micros(),
            row.last_seen.timestamp_micros(),
        ])
        .map_err(|e| StorageError::query(sql, e))?;
    }
    Ok(rows.len())
}

pub fn select_url_patterns(conn: &Connection) -> Result<Vec<UrlPatternSummary>, StorageError> {
    let sql = "SELECT normalized_url, domain_name, request_verb, request_count, error_count,
            avg_processing_ms, max_processing_ms, total_received_bytes,
            total_sent_bytes, first_seen, last_seen
         FROM url_pattern_summaries ORDER BY request_count DESC";
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(UrlPatternSummary {
                normalized_url: row.get(0)?,
                domain_name: row.get(1)?,
                request_verb: row.get(2)?,
                request_count: row.get::<_, i64>(3)? as u64,
                error_count: row.get::<_, i64>(4)? as u64,
                avg_processing_ms: row.get(5)?,
                max_processing_ms: row.get(6)?,
                total_received_bytes: row.get::<_, i64>(7)? as u64,
                total_sent_bytes: row.get::<_, i64>(8)? as u64,
                first_seen: micros_to_datetime(row, 9)?,
                last_seen: micros_to_datetime(row, 10)?,
            })
        })
        .map_err(|e| StorageError::query(sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(sql, e))?);
    }
    Ok(result)
}

// ─── Sessions ────────────────────────────────────────────────────────────────

pub fn upsert_sessions(conn: &Connection, rows: &[SessionSummary]) -> Result<usize, StorageError> {
    let sql = "INSERT OR REPLACE INTO session_summaries
         (client_ip, user_agent_bucket, session_date, total_requests, unique_urls,
          first_request_at, last_request_at, duration_seconds, error_rate)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| StorageError::query(sql, e))?;

    for row in rows {
        stmt.execute(params![
            row.client_ip,
            row.user_agent_bucket,
            row.session_date.to_string(),
            row.total_requests as i64,
            row.unique_urls as i64,
            row.first_request_at.timestamp_micros(),
            row.last_request_at.timestamp_micros(),
            row.duration_seconds,
            row.error_rate,
        ])
        .map_err(|e| StorageError::query(sql, e))?;
    }
    Ok(rows.len())
}

pub fn select_sessions(conn: &Connection) -> Result<Vec<SessionSummary>, StorageError> {
    let sql = "SELECT client_ip, user_agent_bucket, session_date, total_requests,
            unique_urls, first_request_at, last_request_at, duration_seconds, error_rate
         FROM session_summaries ORDER BY session_date DESC, client_ip";
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
    let rows = stmt
        .query_map([], |row| {
            let date: String = row.get(2)?;
            let session_date: NaiveDate = date.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("bad session_date {date:?}").into(),
                )
            })?;
            Ok(SessionSummary {
                client_ip: row.get(0)?,
                user_agent_bucket: row.get(1)?,
                session_date,
                total_requests: row.get::<_, i64>(3)? as u64,
                unique_urls: row.get::<_, i64>(4)? as u64,
                first_request_at: micros_to_datetime(row, 5)?,
                last_request_at: micros_to_datetime(row, 6)?,
                duration_seconds: row.get(7)?,
                error_rate: row.get(8)?,
            })
        })
        .map_err(|e| StorageError::query(sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(sql, e))?);
    }
    Ok(result)
}

// ─── Error patterns ──────────────────────────────────────────────────────────

pub fn upsert_error_patterns(
    conn: &Connection,
    rows: &[ErrorPatternSummary],
) -> Result<usize, StorageError> {
    let sql = "INSERT OR REPLACE INTO error_pattern_summaries
         (error_key, elb_status_code, target_status_code, error_reason,
          normalized_url, occurrence_count, affected_clients, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| StorageError::query(sql, e))?;

    for row in rows {
        stmt.execute(params![
            row.error_key,
            i64::from(row.elb_status_code),
            i64::from(row.target_status_code),
            row.error_reason,
            row.normalized_url,
            row.occurrence_count as i64,
            row.affected_clients as i64,
            row.first_seen.timestamp_micros(),
            row.last_seen.timestamp_micros(),
        ])
        .map_err(|e| StorageError::query(sql, e))?;
    }
    Ok(rows.len())
}

pub fn select_error_patterns(
    conn: &Connection,
) -> Result<Vec<ErrorPatternSummary>, StorageError> {
    let sql = "SELECT error_key, elb_status_code, target_status_code, error_reason,
            normalized_url, occurrence_count, affected_clients, first_seen, last_seen
         FROM error_pattern_summaries ORDER BY occurrence_count DESC";
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ErrorPatternSummary {
                error_key: row.get(0)?,
                elb_status_code: row.get::<_, i64>(1)? as u16,
                target_status_code: row.get::<_, i64>(2)? as u16,
                error_reason: row.get(3)?,
                normalized_url: row.get(4)?,
                occurrence_count: row.get::<_, i64>(5)? as u64,
                affected_clients: row.get::<_, i64>(6)? as u64,
                first_seen: micros_to_datetime(row, 7)?,
                last_seen: micros_to_datetime(row, 8)?,
            })
        })
        .map_err(|e| StorageError::query(sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(sql, e))?);
    }
    Ok(result)
}

// ─── Retention ───────────────────────────────────────────────────────────────

/// Delete hourly rows before `cutoff` and session rows dated before it;
/// returns total rows removed.
pub fn cleanup_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
    let sql = "DELETE FROM hourly_summaries WHERE hour_timestamp < ?1";
    let hourly = conn
        .execute(sql, params![cutoff.timestamp_micros()])
        .map_err(|e| StorageError::query(sql, e))?;

    let sql = "DELETE FROM session_summaries WHERE session_date < ?1";
    let sessions = conn
        .execute(sql, params![cutoff.date_naive().to_string()])
        .map_err(|e| StorageError::query(sql, e))?;

    Ok((hourly + sessions) as u64)
}
