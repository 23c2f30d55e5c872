//! Typed rows for the four pre-aggregated summary tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Keyed by `(hour_timestamp, domain_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySummary {
    /// Start of the hour bucket.
    pub hour_timestamp: DateTime<Utc>,
    pub domain_name: String,
    pub request_count: u64,
    /// Requests with `elb_status_code >= 400`.
    pub error_count: u64,
    pub avg_request_processing_time: f64,
    pub avg_target_processing_time: f64,
    pub avg_response_processing_time: f64,
    pub total_received_bytes: u64,
    pub total_sent_bytes: u64,
    pub unique_clients: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub updated_at: DateTime<Utc>,
}

/// Keyed by `(normalized_url, domain_name, request_verb)`.
/// Only patterns with at least 10 requests are materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlPatternSummary {
    pub normalized_url: String,
    pub domain_name: String,
    pub request_verb: String,
    pub request_count: u64,
    pub error_count: u64,
    pub avg_processing_ms: f64,
    pub max_processing_ms: f64,
    pub total_received_bytes: u64,
    pub total_sent_bytes: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Keyed by `(client_ip, user_agent_bucket, session_date)`.
/// Only groups with at least 5 requests are materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub client_ip: String,
    /// First 32 chars of the user agent.
    pub user_agent_bucket: String,
    pub session_date: NaiveDate,
    pub total_requests: u64,
    pub unique_urls: u64,
    pub first_request_at: DateTime<Utc>,
    pub last_request_at: DateTime<Utc>,
    /// `last_request_at - first_request_at`.
    pub duration_seconds: f64,
    pub error_rate: f64,
}

/// Keyed by the full error signature. Only signatures seen at least 5
/// times are materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPatternSummary {
    /// `error_reason`, or `HTTP_<elb_status_code>` when the reason is empty.
    pub error_key: String,
    pub elb_status_code: u16,
    pub target_status_code: u16,
    pub error_reason: String,
    pub normalized_url: String,
    pub occurrence_count: u64,
    pub affected_clients: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ErrorPatternSummary {
    /// Canonical error key for a status/reason pair.
    pub fn key_for(error_reason: &str, elb_status_code: u16) -> String {
        if error_reason.is_empty() {
            format!("HTTP_{elb_status_code}")
        } else {
            error_reason.to_string()
        }
    }
}
