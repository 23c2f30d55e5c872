//! Shared ingestion progress and the operator-visible error records.

use chrono::{DateTime, Utc};

/// How bad a processing error is. Warnings are skipped lines; errors mark
/// the result unsuccessful; critical errors abort the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

/// One operator-visible processing error.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub file_name: String,
    pub line_number: Option<u64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: ErrorSeverity,
}

impl ProcessingError {
    pub fn new(
        file_name: impl Into<String>,
        line_number: Option<u64>,
        message: impl Into<String>,
        severity: ErrorSeverity,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            line_number,
            message: message.into(),
            timestamp: Utc::now(),
            severity,
        }
    }
}

/// Snapshot of an ingestion in flight. Updated after every line; pushed
/// to the observer at most every 100 lines plus once at completion.
#[derive(Debug, Clone)]
pub struct Progress {
    pub total_files: usize,
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub total_lines: u64,
    pub processed_lines: u64,
    pub successfully_parsed: u64,
    pub failed_lines: u64,
    pub estimated_remaining_ms: Option<u64>,
    pub errors: Vec<ProcessingError>,
    pub started_at: DateTime<Utc>,
    pub is_complete: bool,
}

impl Progress {
    pub fn new(total_files: usize, total_bytes: u64) -> Self {
        Self {
            total_files,
            processed_files: 0,
            current_file: None,
            total_bytes,
            processed_bytes: 0,
            total_lines: 0,
            processed_lines: 0,
            successfully_parsed: 0,
            failed_lines: 0,
            estimated_remaining_ms: None,
            errors: Vec::new(),
            started_at: Utc::now(),
            is_complete: false,
        }
    }

    /// Linear estimate from the observed bytes/ms rate.
    pub fn update_estimate(&mut self, elapsed_ms: u64) {
        if elapsed_ms == 0 || self.processed_bytes == 0 || self.total_bytes == 0 {
            return;
        }
        let rate = self.processed_bytes as f64 / elapsed_ms as f64;
        let remaining = self.total_bytes.saturating_sub(self.processed_bytes);
        self.estimated_remaining_ms = Some((remaining as f64 / rate) as u64);
    }
}
