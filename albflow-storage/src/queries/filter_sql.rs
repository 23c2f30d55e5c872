//! Translate `FilterCriteria` into a WHERE clause + bound parameters.

use albflow_core::models::FilterCriteria;
#[cfg(test)]
use albflow_core::models::SortOrder;
use rusqlite::types::Value;

/// Sortable columns; anything else falls back to `timestamp`.
const SORTABLE_COLUMNS: [&str; 9] = [
    "timestamp",
    "id",
    "elb_status_code",
    "request_url",
    "client_ip",
    "domain_name",
    "received_bytes",
    "sent_bytes",
    "created_at",
];

/// A rendered predicate: `where_sql` is either empty or starts with
/// ` WHERE `, params line up with its placeholders.
pub struct FilterSql {
    pub where_sql: String,
    pub params: Vec<Value>,
}

pub fn build_where(filter: &FilterCriteria) -> FilterSql {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(range) = &filter.time_range {
        conditions.push("timestamp BETWEEN ? AND ?".to_string());
        params.push(Value::Integer(range.start.timestamp_micros()));
        params.push(Value::Integer(range.end.timestamp_micros()));
    }
    if !filter.endpoints.is_empty() {
        conditions.push(in_list("request_url", filter.endpoints.len()));
        params.extend(filter.endpoints.iter().cloned().map(Value::Text));
    }
    if !filter.status_codes.is_empty() {
        conditions.push(in_list("elb_status_code", filter.status_codes.len()));
        params.extend(
            filter
                .status_codes
                .iter()
                .map(|&c| Value::Integer(i64::from(c))),
        );
    }
    if !filter.client_ips.is_empty() {
        conditions.push(in_list("client_ip", filter.client_ips.len()));
        params.extend(filter.client_ips.iter().cloned().map(Value::Text));
    }
    if !filter.user_agent_patterns.is_empty() {
        // Case-insensitive substring; SQLite LIKE is already
        // case-insensitive for ASCII.
        let clauses = vec!["user_agent LIKE ?"; filter.user_agent_patterns.len()];
        conditions.push(format!("({})", clauses.join(" OR ")));
        params.extend(
            filter
                .user_agent_patterns
                .iter()
                .map(|p| Value::Text(format!("%{p}%"))),
        );
    }
    if !filter.domain_names.is_empty() {
        conditions.push(in_list("domain_name", filter.domain_names.len()));
        params.extend(filter.domain_names.iter().cloned().map(Value::Text));
    }

    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    FilterSql { where_sql, params }
}

fn in_list(column: &str, len: usize) -> String {
    let placeholders = vec!["?"; len].join(", ");
    format!("{column} IN ({placeholders})")
}

/// Validated sort column for ORDER BY interpolation.
pub fn sort_column(filter: &FilterCriteria) -> &str {
    match &filter.sort_by {
        Some(col) if SORTABLE_COLUMNS.contains(&col.as_str()) => col,
        Some(other) => {
            tracing::warn!("ignoring unsortable column {other:?}, using timestamp");
            "timestamp"
        }
        None => "timestamp",
    }
}

/// `ORDER BY <col> <dir>, id <dir>` — ties always break on id so DESC
/// scans are deterministic.
pub fn order_clause(filter: &FilterCriteria) -> String {
    let column = sort_column(filter);
    let dir = filter.sort_order.as_sql();
    if column == "id" {
        format!(" ORDER BY id {dir}")
    } else {
        format!(" ORDER BY {column} {dir}, id {dir}")
    }
}

/// Order for an explicitly-directed keyset scan (cursor pagination).
pub fn keyset_order(descending: bool) -> &'static str {
    if descending {
        " ORDER BY timestamp DESC, id DESC"
    } else {
        " ORDER BY timestamp ASC, id ASC"
    }
}
