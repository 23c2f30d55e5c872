//! Summary and insight generation from a finished workflow analysis.

use albflow_core::models::{
    AnalysisSummary, ConversionFunnel, Insight, InsightKind, Session, Severity,
    WorkflowAnalysis,
};
use rustc_hash::FxHashSet;

/// Drop-off points below this rate are not worth an insight.
const DROP_OFF_INSIGHT_RATE: f64 = 0.3;
/// ...and above this rate they are high severity.
const DROP_OFF_HIGH_RATE: f64 = 0.5;
/// Patterns below this success rate are flagged as error-prone.
const ERROR_PRONE_SUCCESS_RATE: f64 = 0.8;
/// A session is "long" past this multiple of the mean duration.
const LONG_SESSION_FACTOR: f64 = 3.0;
/// Long sessions are reported when they exceed this share.
const LONG_SESSION_SHARE: f64 = 0.05;
/// Funnels are built from this many top patterns.
const FUNNEL_TOP_PATTERNS: usize = 5;

pub fn generate_summary(sessions: &[Session], analysis: &WorkflowAnalysis) -> AnalysisSummary {
    let total_sessions = sessions.len() as u64;
    let total_requests: u64 = sessions.iter().map(|s| s.requests.len() as u64).sum();
    let unique_clients = sessions
        .iter()
        .map(|s| s.client_ip.as_str())
        .collect::<FxHashSet<_>>()
        .len() as u64;
    let avg_session_duration_ms = if sessions.is_empty() {
        0.0
    } else {
        sessions.iter().map(|s| s.duration_ms as f64).sum::<f64>() / sessions.len() as f64
    };

    let mut insights = Vec::new();

    // Top-3 serious drop-off points.
    for point in analysis
        .drop_off_points
        .iter()
        .filter(|p| p.drop_off_rate > DROP_OFF_INSIGHT_RATE)
        .take(3)
    {
        insights.push(Insight {
            kind: InsightKind::HighDropOff,
            title: format!("High Drop-off at {}", point.endpoint),
            description: format!(
                "{:.1}% of visits to {} end the session",
                point.drop_off_rate * 100.0,
                point.endpoint
            ),
            severity: if point.drop_off_rate > DROP_OFF_HIGH_RATE {
                Severity::High
            } else {
                Severity::Warning
            },
        });
    }

    if let Some(top) = analysis.patterns.first() {
        insights.push(Insight {
            kind: InsightKind::CommonPattern,
            title: "Most Common Workflow".to_string(),
            description: format!(
                "{} ({} sessions, {:.1}% successful)",
                top.endpoints.join(" -> "),
                top.session_support,
                top.success_rate * 100.0
            ),
            severity: Severity::Info,
        });
    }

    for pattern in analysis
        .patterns
        .iter()
        .filter(|p| p.success_rate < ERROR_PRONE_SUCCESS_RATE)
        .take(2)
    {
        insights.push(Insight {
            kind: InsightKind::ErrorPronePath,
            title: "Error-prone Path".to_string(),
            description: format!(
                "{} succeeds in only {:.1}% of sessions",
                pattern.endpoints.join(" -> "),
                pattern.success_rate * 100.0
            ),
            severity: Severity::Warning,
        });
    }

    if avg_session_duration_ms > 0.0 {
        let long_cutoff = avg_session_duration_ms * LONG_SESSION_FACTOR;
        let long = sessions
            .iter()
            .filter(|s| s.duration_ms as f64 > long_cutoff)
            .count();
        if (long as f64) > total_sessions as f64 * LONG_SESSION_SHARE {
            insights.push(Insight {
                kind: InsightKind::LongSession,
                title: "Unusually Long Sessions".to_string(),
                description: format!(
                    "{long} sessions run longer than 3x the mean duration"
                ),
                severity: Severity::Info,
            });
        }
    }

    let funnels = analysis
        .patterns
        .iter()
        .take(FUNNEL_TOP_PATTERNS)
        .map(|pattern| ConversionFunnel {
            name: format!("Funnel: {}", pattern.endpoints.join(" -> ")),
            steps: pattern.endpoints.clone(),
            conversion_rate: pattern.success_rate,
        })
        .collect();

    AnalysisSummary {
        total_sessions,
        total_requests,
        unique_clients,
        avg_session_duration_ms,
        insights,
        funnels,
    }
}
