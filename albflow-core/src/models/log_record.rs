//! The strongly-typed ALB access-log record.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request verbs accepted by the parser.
pub const ACCEPTED_VERBS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE", "CONNECT",
];

/// One request handled by the load balancer.
///
/// Produced by the parser, owned by ingestion until handed to storage.
/// `id` and `created_at` are assigned by storage on insert and are zero /
/// epoch before that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Row id; 0 until assigned by storage.
    pub id: i64,
    /// Request arrival at the load balancer (microsecond precision).
    pub timestamp: DateTime<Utc>,
    pub client_ip: IpAddr,
    pub client_port: u16,
    /// Absent when the request never reached a target.
    pub target_ip: Option<IpAddr>,
    pub target_port: u16,
    /// Seconds; a `-1` in the source log maps to 0.
    pub request_processing_time: f64,
    pub target_processing_time: f64,
    pub response_processing_time: f64,
    /// Always in 100..=599.
    pub elb_status_code: u16,
    /// 0 when the target was never reached.
    pub target_status_code: u16,
    pub received_bytes: u64,
    pub sent_bytes: u64,
    pub request_verb: String,
    pub request_url: String,
    pub request_protocol: String,
    pub user_agent: String,
    pub ssl_cipher: String,
    pub ssl_protocol: String,
    pub target_group_arn: String,
    pub trace_id: String,
    pub domain_name: String,
    pub chosen_cert_arn: String,
    pub matched_rule_priority: i32,
    pub request_creation_time: DateTime<Utc>,
    pub actions_executed: String,
    pub redirect_url: String,
    pub error_reason: String,
    /// Preserved verbatim from the log line.
    pub target_port_list: String,
    pub target_status_code_list: String,
    pub classification: String,
    pub classification_reason: String,
    /// Empty on v1-format records.
    pub connection_id: String,
    /// Assigned by storage.
    pub created_at: DateTime<Utc>,
}

impl LogRecord {
    /// Post-parse invariants. A record failing this is never stored.
    pub fn validate(&self) -> bool {
        (100..=599).contains(&self.elb_status_code)
            && !self.request_verb.is_empty()
            && !self.request_url.is_empty()
            && !self.request_protocol.is_empty()
            && !self.target_group_arn.is_empty()
            && !self.trace_id.is_empty()
    }

    /// Arrival time in microseconds since the Unix epoch — the storage
    /// representation and the cursor ordering key.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }

    /// Total processing time across all three phases, in milliseconds.
    pub fn total_processing_ms(&self) -> f64 {
        (self.request_processing_time + self.target_processing_time + self.response_processing_time)
            * 1000.0
    }

    /// True when the load balancer answered with a 4xx or 5xx.
    pub fn is_error(&self) -> bool {
        self.elb_status_code >= 400
    }
}
