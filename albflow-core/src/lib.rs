//! # albflow-core
//!
//! Shared foundation for the albflow ALB access-log analytics engine.
//! Record and summary models, filter criteria, error types, configuration,
//! and the storage traits the other crates program against.

pub mod config;
pub mod errors;
pub mod models;
pub mod telemetry;
pub mod traits;

pub use config::AlbFlowConfig;
pub use errors::{AlbFlowError, AlbFlowResult};
pub use models::log_record::LogRecord;
