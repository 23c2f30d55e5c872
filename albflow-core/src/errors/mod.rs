pub mod albflow_error;
pub mod analysis_error;
pub mod ingest_error;
pub mod parse_error;
pub mod storage_error;

pub use albflow_error::{AlbFlowError, AlbFlowResult};
pub use analysis_error::AnalysisError;
pub use ingest_error::IngestError;
pub use parse_error::{ParseError, ParseErrorKind};
pub use storage_error::StorageError;
