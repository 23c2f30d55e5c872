//! Reconstructed client sessions. Derived, never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One request inside a reconstructed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub timestamp: DateTime<Utc>,
    /// Normalised endpoint (query string stripped, parameters collapsed).
    pub endpoint: String,
    pub verb: String,
    pub status: u16,
    /// Sum of the three processing times, in milliseconds.
    pub response_time_ms: f64,
    pub user_agent: String,
    pub bytes: u64,
}

/// An ordered burst of requests from one client IP whose consecutive gaps
/// never exceed the inactivity limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// `<client_ip>:<start_micros>` — stable and re-derivable.
    pub session_id: String,
    pub client_ip: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub requests: Vec<SessionRequest>,
    pub error_count: u64,
    pub total_bytes: u64,
    /// Token extracted from URLs, when any request carried one.
    pub session_token: Option<String>,
}

impl Session {
    pub fn id_for(client_ip: &str, start: DateTime<Utc>) -> String {
        format!("{client_ip}:{}", start.timestamp_micros())
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}
