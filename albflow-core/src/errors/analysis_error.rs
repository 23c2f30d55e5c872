//! Analysis orchestrator errors.

use super::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("pattern not found: {pattern_id}")]
    PatternNotFound { pattern_id: String },

    #[error("invalid session id: {session_id}")]
    InvalidSessionId { session_id: String },
}
