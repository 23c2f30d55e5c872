//! log_entries table queries: multi-row insert, filtered select, keyset
//! scans, count, retention.

use std::net::IpAddr;

use albflow_core::errors::StorageError;
use albflow_core::models::{FilterCriteria, LogRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;

use super::filter_sql::{self, build_where};
use crate::pagination::CursorKey;

/// Columns written on insert, in placeholder order.
const INSERT_COLUMNS: &str = "timestamp, client_ip, client_port, target_ip, target_port,
     request_processing_time, target_processing_time, response_processing_time,
     elb_status_code, target_status_code, received_bytes, sent_bytes,
     request_verb, request_url, request_protocol, user_agent, ssl_cipher,
     ssl_protocol, target_group_arn, trace_id, domain_name, chosen_cert_arn,
     matched_rule_priority, request_creation_time, actions_executed,
     redirect_url, error_reason, target_port_list, target_status_code_list,
     classification, classification_reason, connection_id, created_at";

const INSERT_COLUMN_COUNT: usize = 33;

/// SQLite's bound-variable ceiling caps one multi-row statement; larger
/// batches run as several statements inside the caller's transaction.
pub const MAX_ROWS_PER_STATEMENT: usize = 500;

const SELECT_COLUMNS: &str = "id, timestamp, client_ip, client_port, target_ip, target_port,
     request_processing_time, target_processing_time, response_processing_time,
     elb_status_code, target_status_code, received_bytes, sent_bytes,
     request_verb, request_url, request_protocol, user_agent, ssl_cipher,
     ssl_protocol, target_group_arn, trace_id, domain_name, chosen_cert_arn,
     matched_rule_priority, request_creation_time, actions_executed,
     redirect_url, error_reason, target_port_list, target_status_code_list,
     classification, classification_reason, connection_id, created_at";

/// Insert records with one shared `created_at`. The caller owns the
/// surrounding transaction; this may execute several multi-row statements.
pub fn insert_records(
    conn: &Connection,
    records: &[LogRecord],
    created_at: DateTime<Utc>,
) -> Result<usize, StorageError> {
    let created_at_micros = created_at.timestamp_micros();
    let mut inserted = 0;

    for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
        let row_tuple = format!("({})", vec!["?"; INSERT_COLUMN_COUNT].join(", "));
        let tuples = vec![row_tuple; chunk.len()].join(", ");
        let sql = format!("INSERT INTO log_entries ({INSERT_COLUMNS}) VALUES {tuples}");

        let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * INSERT_COLUMN_COUNT);
        for record in chunk {
            push_record_params(&mut params, record, created_at_micros);
        }

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::query(&sql, e))?;
        inserted += stmt
            .execute(rusqlite::params_from_iter(params))
            .map_err(|e| StorageError::query(&sql, e))?;
    }

    Ok(inserted)
}

fn push_record_params(params: &mut Vec<Value>, record: &LogRecord, created_at_micros: i64) {
    params.push(Value::Integer(record.timestamp_micros()));
    params.push(Value::Text(record.client_ip.to_string()));
    params.push(Value::Integer(i64::from(record.client_port)));
    params.push(Value::Text(
        record.target_ip.map(|ip| ip.to_string()).unwrap_or_default(),
    ));
    params.push(Value::Integer(i64::from(record.target_port)));
    params.push(Value::Real(record.request_processing_time));
    params.push(Value::Real(record.target_processing_time));
    params.push(Value::Real(record.response_processing_time));
    params.push(Value::Integer(i64::from(record.elb_status_code)));
    params.push(Value::Integer(i64::from(record.target_status_code)));
    params.push(Value::Integer(record.received_bytes as i64));
    params.push(Value::Integer(record.sent_bytes as i64));
    params.push(Value::Text(record.request_verb.clone()));
    params.push(Value::Text(record.request_url.clone()));
    params.push(Value::Text(record.request_protocol.clone()));
    params.push(Value::Text(record.user_agent.clone()));
    params.push(Value::Text(record.ssl_cipher.clone()));
    params.push(Value::Text(record.ssl_protocol.clone()));
    params.push(Value::Text(record.target_group_arn.clone()));
    params.push(Value::Text(record.trace_id.clone()));
    params.push(Value::Text(record.domain_name.clone()));
    params.push(Value::Text(record.chosen_cert_arn.clone()));
    params.push(Value::Integer(i64::from(record.matched_rule_priority)));
    params.push(Value::Integer(record.request_creation_time.timestamp_micros()));
    params.push(Value::Text(record.actions_executed.clone()));
    params.push(Value::Text(record.redirect_url.clone()));
    params.push(Value::Text(record.error_reason.clone()));
    params.push(Value::Text(record.target_port_list.clone()));
    params.push(Value::Text(record.target_status_code_list.clone()));
    params.push(Value::Text(record.classification.clone()));
    params.push(Value::Text(record.classification_reason.clone()));
    params.push(Value::Text(record.connection_id.clone()));
    params.push(Value::Integer(created_at_micros));
}

/// Filtered select with explicit limit/offset; ordering comes from the
/// filter's sort column + id tie-break.
pub fn select(
    conn: &Connection,
    filter: &FilterCriteria,
    limit: usize,
    offset: usize,
) -> Result<Vec<LogRecord>, StorageError> {
    let built = build_where(filter);
    let order = filter_sql::order_clause(filter);
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM log_entries{}{order} LIMIT ? OFFSET ?",
        built.where_sql
    );

    let mut params = built.params;
    params.push(Value::Integer(limit as i64));
    params.push(Value::Integer(offset as i64));

    query_records(conn, &sql, params)
}

/// Keyset scan for cursor pagination. `descending` is the forward
/// direction; the cursor bound is strict in the scan direction.
pub fn select_keyset(
    conn: &Connection,
    filter: &FilterCriteria,
    cursor: Option<CursorKey>,
    limit: usize,
    descending: bool,
) -> Result<Vec<LogRecord>, StorageError> {
    let built = build_where(filter);
    let mut params = built.params;

    let cursor_sql = match cursor {
        Some(key) => {
            let cmp = if descending { "<" } else { ">" };
            params.push(Value::Integer(key.timestamp_micros));
            params.push(Value::Integer(key.timestamp_micros));
            params.push(Value::Integer(key.id));
            if built.where_sql.is_empty() {
                format!(" WHERE (timestamp {cmp} ? OR (timestamp = ? AND id {cmp} ?))")
            } else {
                format!(" AND (timestamp {cmp} ? OR (timestamp = ? AND id {cmp} ?))")
            }
        }
        None => String::new(),
    };

    let order = filter_sql::keyset_order(descending);
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM log_entries{}{cursor_sql}{order} LIMIT ?",
        built.where_sql
    );
    params.push(Value::Integer(limit as i64));

    query_records(conn, &sql, params)
}

pub fn count(conn: &Connection, filter: &FilterCriteria) -> Result<u64, StorageError> {
    let built = build_where(filter);
    let sql = format!("SELECT COUNT(*) FROM log_entries{}", built.where_sql);
    let count: i64 = conn
        .query_row(&sql, rusqlite::params_from_iter(built.params), |row| {
            row.get(0)
        })
        .map_err(|e| StorageError::query(&sql, e))?;
    Ok(count as u64)
}

/// Delete entries older than the given instant; returns rows removed.
pub fn delete_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
    let sql = "DELETE FROM log_entries WHERE timestamp < ?1";
    conn.execute(sql, rusqlite::params![cutoff.timestamp_micros()])
        .map(|n| n as u64)
        .map_err(|e| StorageError::query(sql, e))
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<LogRecord>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), map_record_row)
        .map_err(|e| StorageError::query(sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(sql, e))?);
    }
    Ok(result)
}

/// Shared row mapper; column order matches `SELECT_COLUMNS`.
pub fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRecord> {
    let client_ip: String = row.get(2)?;
    let client_ip: IpAddr = client_ip.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let target_ip: String = row.get(4)?;
    let target_ip: Option<IpAddr> = if target_ip.is_empty() {
        None
    } else {
        Some(target_ip.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?)
    };

    Ok(LogRecord {
        id: row.get(0)?,
        timestamp: micros_to_datetime(row, 1)?,
        client_ip,
        client_port: row.get::<_, i64>(3)? as u16,
        target_ip,
        target_port: row.get::<_, i64>(5)? as u16,
        request_processing_time: row.get(6)?,
        target_processing_time: row.get(7)?,
        response_processing_time: row.get(8)?,
        elb_status_code: row.get::<_, i64>(9)? as u16,
        target_status_code: row.get::<_, i64>(10)? as u16,
        received_bytes: row.get::<_, i64>(11)? as u64,
        sent_bytes: row.get::<_, i64>(12)? as u64,
        request_verb: row.get(13)?,
        request_url: row.get(14)?,
        request_protocol: row.get(15)?,
        user_agent: row.get(16)?,
        ssl_cipher: row.get(17)?,
        ssl_protocol: row.get(18)?,
        target_group_arn: row.get(19)?,
        trace_id: row.get(20)?,
        domain_name: row.get(21)?,
        chosen_cert_arn: row.get(22)?,
        matched_rule_priority: row.get::<_, i64>(23)? as i32,
        request_creation_time: micros_to_datetime(row, 24)?,
        actions_executed: row.get(25)?,
        redirect_url: row.get(26)?,
        error_reason: row.get(27)?,
        target_port_list: row.get(28)?,
        target_status_code_list: row.get(29)?,
        classification: row.get(30)?,
        classification_reason: row.get(31)?,
        connection_id: row.get(32)?,
        created_at: micros_to_datetime(row, 33)?,
    })
}

pub(crate) fn micros_to_datetime(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("{micros} is out of range for a timestamp").into(),
        )
    })
}
