//! Download-batch ledger model. Opaque to analytics; ingestion uses it to
//! locate files and track processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Downloading,
    Completed,
    Processing,
    Processed,
    Error,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Legal lifecycle moves. Error and Cancelled are reachable from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use BatchStatus::*;
        if matches!(self, Processed | Error | Cancelled) {
            return false;
        }
        match (self, next) {
            (Pending, Downloading) => true,
            (Downloading, Completed) => true,
            (Completed, Processing) => true,
            (Processing, Processed) => true,
            (_, Error) | (_, Cancelled) => true,
            _ => false,
        }
    }
}

/// One acquired group of log files, tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadBatch {
    pub batch_id: String,
    pub batch_name: String,
    pub download_date: DateTime<Utc>,
    pub file_count: u32,
    pub total_size_bytes: u64,
    /// Original S3 object keys (possibly `s3://bucket/key` form).
    pub s3_file_paths: Vec<String>,
    /// Where the files landed on local disk.
    pub local_file_paths: Vec<String>,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub download_started_at: Option<DateTime<Utc>>,
    pub download_completed_at: Option<DateTime<Utc>>,
    pub estimated_size_bytes: u64,
    pub progress_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::BatchStatus::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));

        assert!(!Pending.can_transition_to(Processed));
        assert!(!Completed.can_transition_to(Downloading));
    }

    #[test]
    fn terminal_states_stay_terminal() {
        for terminal in [Processed, Error, Cancelled] {
            for next in [Pending, Downloading, Completed, Processing, Processed, Error, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn any_active_state_may_fail_or_cancel() {
        for state in [Pending, Downloading, Completed, Processing] {
            assert!(state.can_transition_to(Error));
            assert!(state.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [Pending, Downloading, Completed, Processing, Processed, Error, Cancelled] {
            assert_eq!(super::BatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(super::BatchStatus::parse("unknown"), None);
    }
}
