//! Query filter criteria recognised by the storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open is not used here: both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter recognised by every query variant. All fields optional; empty
/// vectors mean "no constraint on this field".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub time_range: Option<TimeRange>,
    /// Exact match on `request_url`.
    pub endpoints: Vec<String>,
    pub status_codes: Vec<u16>,
    pub client_ips: Vec<String>,
    /// Case-insensitive substring match on `user_agent`.
    pub user_agent_patterns: Vec<String>,
    pub domain_names: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Caller-side row cap, clamped to the engine-wide maximum.
    pub max_rows: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub sort_order: SortOrder,
    /// Defaults to `timestamp`. Must name a sortable column.
    pub sort_by: Option<String>,
}

impl FilterCriteria {
    /// A filter constrained to a single time window.
    pub fn for_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            time_range: Some(TimeRange { start, end }),
            ..Self::default()
        }
    }

    /// True when no predicate is set (limits and ordering don't count).
    pub fn is_unconstrained(&self) -> bool {
        self.time_range.is_none()
            && self.endpoints.is_empty()
            && self.status_codes.is_empty()
            && self.client_ips.is_empty()
            && self.user_agent_patterns.is_empty()
            && self.domain_names.is_empty()
    }
}
