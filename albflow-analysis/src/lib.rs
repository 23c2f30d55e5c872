//! # albflow-analysis
//!
//! Workflow/session analytics over stored log records. The orchestrator
//! picks one of three strategies per request (full in-memory, aggregated
//! fast path, streaming-sampled), reconstructs client sessions, discovers
//! recurring endpoint patterns, and distils insights.

pub mod insights;
pub mod orchestrator;
pub mod patterns;
pub mod session;

pub use orchestrator::{AnalyzeOptions, Strategy, WorkflowAnalyzer};
pub use patterns::PatternDiscoverer;
pub use session::SessionReconstructor;
