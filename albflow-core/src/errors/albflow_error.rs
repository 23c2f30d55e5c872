use super::{AnalysisError, IngestError, ParseError, StorageError};

/// Top-level error type for the albflow engine.
/// All subsystem errors convert into this via `From` impls.
#[derive(Debug, thiserror::Error)]
pub enum AlbFlowError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias.
pub type AlbFlowResult<T> = Result<T, AlbFlowError>;
