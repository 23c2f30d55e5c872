//! Workflow patterns, transition analysis, insights. In-memory only —
//! produced per analysis request and discarded with it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filter::FilterCriteria;
use super::session::Session;

/// Coarse user-agent classification used in pattern breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UaCategory {
    Mobile,
    Bot,
    Desktop,
    Other,
}

impl UaCategory {
    /// Substring rules, checked in order: bots first (crawlers often
    /// spoof mobile tokens), then mobile, then desktop OS markers.
    pub fn classify(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.is_empty() {
            return Self::Other;
        }
        if ua.contains("bot") || ua.contains("crawler") || ua.contains("spider") {
            return Self::Bot;
        }
        if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
            return Self::Mobile;
        }
        if ua.contains("windows") || ua.contains("macintosh") || ua.contains("x11") {
            return Self::Desktop;
        }
        Self::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Bot => "bot",
            Self::Desktop => "desktop",
            Self::Other => "other",
        }
    }
}

/// A recurring contiguous endpoint sequence across sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    pub pattern_id: String,
    pub endpoints: Vec<String>,
    /// Total occurrences across all sessions.
    pub frequency: u64,
    /// Number of distinct sessions containing the pattern.
    pub session_support: u64,
    /// Mean wall time from first to last request of an occurrence.
    pub avg_duration_ms: f64,
    /// Fraction of supporting sessions with zero errors.
    pub success_rate: f64,
    /// Supporting-session count per user-agent category.
    pub user_agent_breakdown: HashMap<String, u64>,
}

/// Outgoing edge statistics for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionStats {
    pub count: u64,
    pub probability: f64,
    pub avg_gap_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCount {
    pub endpoint: String,
    pub count: u64,
}

/// An endpoint where sessions frequently end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropOffPoint {
    pub endpoint: String,
    /// Fraction of visits after which the session ended.
    pub drop_off_rate: f64,
    pub avg_time_spent_ms: f64,
    /// Where the non-exiting visits went next.
    pub continuations: HashMap<String, u64>,
}

/// Full workflow analysis over a set of sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAnalysis {
    pub patterns: Vec<WorkflowPattern>,
    /// endpoint → next endpoint → stats.
    pub transitions: HashMap<String, HashMap<String, TransitionStats>>,
    pub entry_points: Vec<EndpointCount>,
    pub exit_points: Vec<EndpointCount>,
    pub drop_off_points: Vec<DropOffPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    HighDropOff,
    CommonPattern,
    ErrorPronePath,
    LongSession,
    AggregatedAnalysis,
    SampledAnalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

/// Funnel view over a top pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionFunnel {
    pub name: String,
    pub steps: Vec<String>,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_sessions: u64,
    pub total_requests: u64,
    pub unique_clients: u64,
    pub avg_session_duration_ms: f64,
    pub insights: Vec<Insight>,
    pub funnels: Vec<ConversionFunnel>,
}

/// Everything one `analyze` call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sessions: Vec<Session>,
    pub analysis: WorkflowAnalysis,
    pub summary: AnalysisSummary,
    pub processing_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub applied_filters: FilterCriteria,
}
