pub mod storage;

pub use storage::{IAnalyticsStore, IBatchLedger, ILogEntryStore, RecordSink};
