//! download_batches ledger queries.

use albflow_core::errors::StorageError;
use albflow_core::models::{BatchStatus, DownloadBatch};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::log_entries::micros_to_datetime;

const SELECT_COLUMNS: &str = "batch_id, batch_name, download_date, file_count, total_size_bytes,
     s3_file_paths, local_file_paths, status, error_message,
     download_started_at, download_completed_at, estimated_size_bytes,
     progress_percentage, created_at, updated_at";

pub fn insert_batch(conn: &Connection, batch: &DownloadBatch) -> Result<(), StorageError> {
    let sql = "INSERT INTO download_batches (batch_id, batch_name, download_date, file_count,
         total_size_bytes, s3_file_paths, local_file_paths, status, error_message,
         download_started_at, download_completed_at, estimated_size_bytes,
         progress_percentage, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

    let s3_paths = serde_json::to_string(&batch.s3_file_paths)
        .map_err(|e| StorageError::query(sql, e))?;
    let local_paths = serde_json::to_string(&batch.local_file_paths)
        .map_err(|e| StorageError::query(sql, e))?;

    conn.execute(
        sql,
        params![
            batch.batch_id,
            batch.batch_name,
            batch.download_date.timestamp_micros(),
            batch.file_count,
            batch.total_size_bytes as i64,
            s3_paths,
            local_paths,
            batch.status.as_str(),
            batch.error_message,
            batch.download_started_at.map(|t| t.timestamp_micros()),
            batch.download_completed_at.map(|t| t.timestamp_micros()),
            batch.estimated_size_bytes as i64,
            batch.progress_percentage,
            batch.created_at.timestamp_micros(),
            batch.updated_at.timestamp_micros(),
        ],
    )
    .map_err(|e| StorageError::query(sql, e))?;
    Ok(())
}

pub fn get_batch(
    conn: &Connection,
    batch_id: &str,
) -> Result<Option<DownloadBatch>, StorageError> {
    let sql =
        format!("SELECT {SELECT_COLUMNS} FROM download_batches WHERE batch_id = ?1");
    conn.query_row(&sql, params![batch_id], map_batch_row)
        .optional()
        .map_err(|e| StorageError::query(&sql, e))
}

/// Set a batch's status (and optionally an error message). A transition
/// to a completed-like status also stamps `download_completed_at`.
pub fn update_status(
    conn: &Connection,
    batch_id: &str,
    status: BatchStatus,
    error_message: Option<&str>,
) -> Result<bool, StorageError> {
    let now = Utc::now().timestamp_micros();
    let completed_at = matches!(status, BatchStatus::Completed).then_some(now);

    let sql = "UPDATE download_batches
         SET status = ?2,
             error_message = COALESCE(?3, error_message),
             download_completed_at = COALESCE(?4, download_completed_at),
             updated_at = ?5
         WHERE batch_id = ?1";
    let rows = conn
        .execute(sql, params![batch_id, status.as_str(), error_message, completed_at, now])
        .map_err(|e| StorageError::query(sql, e))?;
    Ok(rows > 0)
}

pub fn set_progress(
    conn: &Connection,
    batch_id: &str,
    progress_percentage: f64,
) -> Result<(), StorageError> {
    let sql = "UPDATE download_batches SET progress_percentage = ?2, updated_at = ?3
         WHERE batch_id = ?1";
    conn.execute(
        sql,
        params![batch_id, progress_percentage.clamp(0.0, 100.0), Utc::now().timestamp_micros()],
    )
    .map_err(|e| StorageError::query(sql, e))?;
    Ok(())
}

pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<DownloadBatch>, StorageError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM download_batches ORDER BY created_at DESC LIMIT ?1"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::query(&sql, e))?;
    let rows = stmt
        .query_map(params![limit as i64], map_batch_row)
        .map_err(|e| StorageError::query(&sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| StorageError::query(&sql, e))?);
    }
    Ok(result)
}

/// S3 key list + completion time of every batch, for prefix accounting.
pub fn all_key_rows(
    conn: &Connection,
) -> Result<Vec<(Vec<String>, Option<DateTime<Utc>>)>, StorageError> {
    let sql = "SELECT s3_file_paths, download_completed_at FROM download_batches";
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
    let rows = stmt
        .query_map([], |row| {
            let paths: String = row.get(0)?;
            let completed: Option<i64> = row.get(1)?;
            Ok((paths, completed))
        })
        .map_err(|e| StorageError::query(sql, e))?;

    let mut result = Vec::new();
    for row in rows {
        let (paths_json, completed) = row.map_err(|e| StorageError::query(sql, e))?;
        let paths: Vec<String> = serde_json::from_str(&paths_json)
            .map_err(|e| StorageError::query(sql, e))?;
        let completed = completed.and_then(DateTime::from_timestamp_micros);
        result.push((paths, completed));
    }
    Ok(result)
}

fn map_batch_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DownloadBatch> {
    let s3_json: String = row.get(5)?;
    let local_json: String = row.get(6)?;
    let json_err = |e: serde_json::Error, idx: usize| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };
    let status: String = row.get(7)?;
    let status = BatchStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown batch status {status:?}").into(),
        )
    })?;

    Ok(DownloadBatch {
        batch_id: row.get(0)?,
        batch_name: row.get(1)?,
        download_date: micros_to_datetime(row, 2)?,
        file_count: row.get::<_, i64>(3)? as u32,
        total_size_bytes: row.get::<_, i64>(4)? as u64,
        s3_file_paths: serde_json::from_str(&s3_json).map_err(|e| json_err(e, 5))?,
        local_file_paths: serde_json::from_str(&local_json).map_err(|e| json_err(e, 6))?,
        status,
        error_message: row.get(8)?,
        download_started_at: row
            .get::<_, Option<i64>>(9)?
            .and_then(DateTime::from_timestamp_micros),
        download_completed_at: row
            .get::<_, Option<i64>>(10)?
            .and_then(DateTime::from_timestamp_micros),
        estimated_size_bytes: row.get::<_, i64>(11)? as u64,
        progress_percentage: row.get(12)?,
        created_at: micros_to_datetime(row, 13)?,
        updated_at: micros_to_datetime(row, 14)?,
    })
}
