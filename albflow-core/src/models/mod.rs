pub mod batch;
pub mod filter;
pub mod log_record;
pub mod query;
pub mod session;
pub mod summaries;
pub mod workflow;

pub use batch::{BatchStatus, DownloadBatch};
pub use filter::{FilterCriteria, SortOrder, TimeRange};
pub use log_record::LogRecord;
pub use query::{BatchInsertResult, CursorDirection, CursorPage, Paginated, StorageStats};
pub use session::{Session, SessionRequest};
pub use summaries::{ErrorPatternSummary, HourlySummary, SessionSummary, UrlPatternSummary};
pub use workflow::{
    AnalysisResult, AnalysisSummary, ConversionFunnel, DropOffPoint, EndpointCount, Insight,
    InsightKind, Severity, TransitionStats, UaCategory, WorkflowAnalysis, WorkflowPattern,
};
