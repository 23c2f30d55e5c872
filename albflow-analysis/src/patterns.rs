//! Contiguous-subsequence pattern discovery, the endpoint transition
//! matrix, entry/exit points and drop-off analysis.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use albflow_core::config::PatternConfig;
use albflow_core::models::{
    DropOffPoint, EndpointCount, Session, TransitionStats, UaCategory, WorkflowAnalysis,
    WorkflowPattern,
};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use tracing::debug;

/// Endpoints must be visited at least this often to qualify as a
/// drop-off point.
const MIN_DROP_OFF_OCCURRENCES: u64 = 10;
/// ...and sessions must end there at more than this rate.
const MIN_DROP_OFF_RATE: f64 = 0.1;

struct PatternAcc {
    endpoints: Vec<String>,
    /// Distinct sessions containing the pattern.
    session_support: u64,
    /// All occurrences, repeats within a session included.
    frequency: u64,
    duration_sum_ms: f64,
    duration_count: u64,
    error_free_sessions: u64,
    ua_breakdown: HashMap<String, u64>,
}

pub struct PatternDiscoverer {
    config: PatternConfig,
}

impl PatternDiscoverer {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Patterns + transitions + entry/exit + drop-offs in one pass set.
    pub fn analyze_workflows(&self, sessions: &[Session]) -> WorkflowAnalysis {
        WorkflowAnalysis {
            patterns: self.discover(sessions),
            transitions: build_transitions(sessions),
            entry_points: endpoint_counts(sessions, |s| s.requests.first()),
            exit_points: endpoint_counts(sessions, |s| s.requests.last()),
            drop_off_points: find_drop_offs(sessions),
        }
    }

    /// Enumerate contiguous endpoint subsequences of length
    /// 2..=max_pattern_length, deduped within each session, and keep
    /// those supported by at least ⌊sessions · min_support⌋ sessions.
    pub fn discover(&self, sessions: &[Session]) -> Vec<WorkflowPattern> {
        let threshold =
            ((sessions.len() as f64 * self.config.min_support).floor() as u64).max(1);

        let mut accs: FxHashMap<String, PatternAcc> = FxHashMap::default();

        for session in sessions {
            let endpoints: Vec<&str> =
                session.requests.iter().map(|r| r.endpoint.as_str()).collect();
            let ua_category = session
                .requests
                .first()
                .map(|r| UaCategory::classify(&r.user_agent))
                .unwrap_or(UaCategory::Other);

            let mut seen_in_session: FxHashSet<String> = FxHashSet::default();
            let max_len = self.config.max_pattern_length.max(2).min(endpoints.len());

            for len in 2..=max_len {
                for start in 0..=(endpoints.len() - len) {
                    let window = &session.requests[start..start + len];
                    let key = endpoints[start..start + len].join(" -> ");

                    let duration_ms = (window[len - 1].timestamp - window[0].timestamp)
                        .num_milliseconds()
                        .max(0) as f64;

                    let acc = accs.entry(key).or_insert_with(|| PatternAcc {
                        endpoints: window.iter().map(|r| r.endpoint.clone()).collect(),
                        session_support: 0,
                        frequency: 0,
                        duration_sum_ms: 0.0,
                        duration_count: 0,
                        error_free_sessions: 0,
                        ua_breakdown: HashMap::new(),
                    });
                    acc.frequency += 1;
                    acc.duration_sum_ms += duration_ms;
                    acc.duration_count += 1;

                    if seen_in_session.insert(endpoints[start..start + len].join(" -> ")) {
                        acc.session_support += 1;
                        if session.error_count == 0 {
                            acc.error_free_sessions += 1;
                        }
                        *acc
                            .ua_breakdown
                            .entry(ua_category.as_str().to_string())
                            .or_default() += 1;
                    }
                }
            }
        }

        let mut patterns: Vec<WorkflowPattern> = accs
            .into_values()
            .filter(|acc| acc.session_support >= threshold)
            .map(|acc| WorkflowPattern {
                pattern_id: pattern_id(&acc.endpoints),
                frequency: acc.frequency,
                session_support: acc.session_support,
                avg_duration_ms: if acc.duration_count > 0 {
                    acc.duration_sum_ms / acc.duration_count as f64
                } else {
                    0.0
                },
                success_rate: if acc.session_support > 0 {
                    acc.error_free_sessions as f64 / acc.session_support as f64
                } else {
                    0.0
                },
                user_agent_breakdown: acc.ua_breakdown,
                endpoints: acc.endpoints,
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.session_support
                .cmp(&a.session_support)
                .then_with(|| b.frequency.cmp(&a.frequency))
                .then_with(|| b.endpoints.len().cmp(&a.endpoints.len()))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        debug!(
            "discovered {} patterns from {} sessions (threshold {threshold})",
            patterns.len(),
            sessions.len()
        );
        patterns
    }
}

/// Jaccard similarity over the endpoint sets of two patterns.
pub fn pattern_similarity(a: &WorkflowPattern, b: &WorkflowPattern) -> f64 {
    let set_a: FxHashSet<&str> = a.endpoints.iter().map(String::as_str).collect();
    let set_b: FxHashSet<&str> = b.endpoints.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Stable id derived from the endpoint sequence.
fn pattern_id(endpoints: &[String]) -> String {
    let mut hasher = FxHasher::default();
    endpoints.hash(&mut hasher);
    format!("pattern-{:016x}", hasher.finish())
}

fn build_transitions(
    sessions: &[Session],
) -> HashMap<String, HashMap<String, TransitionStats>> {
    struct Edge {
        count: u64,
        gap_sum_ms: f64,
    }
    let mut edges: FxHashMap<(String, String), Edge> = FxHashMap::default();
    let mut outgoing: FxHashMap<String, u64> = FxHashMap::default();

    for session in sessions {
        for pair in session.requests.windows(2) {
            let from = pair[0].endpoint.clone();
            let to = pair[1].endpoint.clone();
            let gap_ms =
                (pair[1].timestamp - pair[0].timestamp).num_milliseconds().max(0) as f64;
            let edge = edges.entry((from.clone(), to)).or_insert(Edge {
                count: 0,
                gap_sum_ms: 0.0,
            });
            edge.count += 1;
            edge.gap_sum_ms += gap_ms;
            *outgoing.entry(from).or_default() += 1;
        }
    }

    let mut transitions: HashMap<String, HashMap<String, TransitionStats>> = HashMap::new();
    for ((from, to), edge) in edges {
        let total = outgoing.get(&from).copied().unwrap_or(edge.count);
        transitions.entry(from).or_default().insert(
            to,
            TransitionStats {
                count: edge.count,
                probability: edge.count as f64 / total as f64,
                avg_gap_ms: edge.gap_sum_ms / edge.count as f64,
            },
        );
    }
    transitions
}

fn endpoint_counts(
    sessions: &[Session],
    pick: impl Fn(&Session) -> Option<&albflow_core::models::SessionRequest>,
) -> Vec<EndpointCount> {
    let mut counts: FxHashMap<String, u64> = FxHashMap::default();
    for session in sessions {
        if let Some(request) = pick(session) {
            *counts.entry(request.endpoint.clone()).or_default() += 1;
        }
    }
    let mut result: Vec<EndpointCount> = counts
        .into_iter()
        .map(|(endpoint, count)| EndpointCount { endpoint, count })
        .collect();
    result.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
    result
}

/// Endpoints where sessions end unusually often: visited at least 10
/// times with an exit rate above 0.1.
fn find_drop_offs(sessions: &[Session]) -> Vec<DropOffPoint> {
    struct Visit {
        occurrences: u64,
        exits: u64,
        time_spent_sum_ms: f64,
        time_spent_count: u64,
        continuations: HashMap<String, u64>,
    }
    let mut visits: FxHashMap<String, Visit> = FxHashMap::default();

    for session in sessions {
        let requests = &session.requests;
        for (i, request) in requests.iter().enumerate() {
            let visit = visits
                .entry(request.endpoint.clone())
                .or_insert_with(|| Visit {
                    occurrences: 0,
                    exits: 0,
                    time_spent_sum_ms: 0.0,
                    time_spent_count: 0,
                    continuations: HashMap::new(),
                });
            visit.occurrences += 1;
            match requests.get(i + 1) {
                Some(next) => {
                    let gap_ms =
                        (next.timestamp - request.timestamp).num_milliseconds().max(0) as f64;
                    visit.time_spent_sum_ms += gap_ms;
                    visit.time_spent_count += 1;
                    *visit.continuations.entry(next.endpoint.clone()).or_default() += 1;
                }
                None => visit.exits += 1,
            }
        }
    }

    let mut drop_offs: Vec<DropOffPoint> = visits
        .into_iter()
        .filter(|(_, v)| v.occurrences >= MIN_DROP_OFF_OCCURRENCES)
        .filter_map(|(endpoint, v)| {
            let rate = v.exits as f64 / v.occurrences as f64;
            (rate > MIN_DROP_OFF_RATE).then(|| DropOffPoint {
                endpoint,
                drop_off_rate: rate,
                avg_time_spent_ms: if v.time_spent_count > 0 {
                    v.time_spent_sum_ms / v.time_spent_count as f64
                } else {
                    0.0
                },
                continuations: v.continuations,
            })
        })
        .collect();

    drop_offs.sort_by(|a, b| {
        b.drop_off_rate
            .partial_cmp(&a.drop_off_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.endpoint.cmp(&b.endpoint))
    });
    drop_offs
}

#[cfg(test)]
mod tests {
    use super::*;
    use albflow_core::models::SessionRequest;
    use chrono::{Duration, TimeZone, Utc};

    fn session(id: u32, endpoints: &[&str], errors: u64, ua: &str) -> Session {
        let start = Utc.with_ymd_and_hms(2023, 12, 1, 10, 0, 0).unwrap();
        let requests: Vec<SessionRequest> = endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| SessionRequest {
                timestamp: start + Duration::seconds(i as i64 * 30),
                endpoint: e.to_string(),
                verb: "GET".into(),
                status: 200,
                response_time_ms: 10.0,
                user_agent: ua.to_string(),
                bytes: 100,
            })
            .collect();
        let end = requests.last().map(|r| r.timestamp).unwrap_or(start);
        Session {
            session_id: format!("s-{id}"),
            client_ip: format!("10.0.0.{id}"),
            start_time: start,
            end_time: end,
            duration_ms: (end - start).num_milliseconds() as u64,
            requests,
            error_count: errors,
            total_bytes: 0,
            session_token: None,
        }
    }

    fn discoverer() -> PatternDiscoverer {
        PatternDiscoverer::new(PatternConfig::default())
    }

    #[test]
    fn every_retained_pattern_meets_the_support_threshold() {
        let config = PatternConfig {
            min_support: 0.5,
            max_pattern_length: 4,
        };
        let sessions = vec![
            session(1, &["/a", "/b", "/c"], 0, "ua"),
            session(2, &["/a", "/b"], 0, "ua"),
            session(3, &["/x", "/y"], 0, "ua"),
            session(4, &["/a", "/b"], 0, "ua"),
        ];
        let patterns = PatternDiscoverer::new(config).discover(&sessions);
        let threshold = (sessions.len() as f64 * 0.5).floor() as u64;
        assert!(!patterns.is_empty());
        for pattern in &patterns {
            assert!(pattern.session_support >= threshold);
        }
        assert_eq!(patterns[0].endpoints, vec!["/a", "/b"]);
        assert_eq!(patterns[0].session_support, 3);
    }

    #[test]
    fn duplicate_windows_count_once_per_session_for_support() {
        let sessions = vec![session(1, &["/a", "/b", "/a", "/b"], 0, "ua")];
        let patterns = discoverer().discover(&sessions);
        let ab = patterns
            .iter()
            .find(|p| p.endpoints == vec!["/a", "/b"])
            .unwrap();
        assert_eq!(ab.session_support, 1);
        assert_eq!(ab.frequency, 2);
    }

    #[test]
    fn success_rate_reflects_error_free_sessions() {
        let sessions = vec![
            session(1, &["/a", "/b"], 0, "ua"),
            session(2, &["/a", "/b"], 3, "ua"),
        ];
        let patterns = discoverer().discover(&sessions);
        let ab = &patterns[0];
        assert_eq!(ab.success_rate, 0.5);
    }

    #[test]
    fn user_agents_are_bucketed() {
        let sessions = vec![
            session(1, &["/a", "/b"], 0, "Mozilla/5.0 (iPhone; Mobile Safari)"),
            session(2, &["/a", "/b"], 0, "Googlebot/2.1"),
            session(3, &["/a", "/b"], 0, "Mozilla/5.0 (Windows NT 10.0)"),
        ];
        let patterns = discoverer().discover(&sessions);
        let breakdown = &patterns[0].user_agent_breakdown;
        assert_eq!(breakdown.get("mobile"), Some(&1));
        assert_eq!(breakdown.get("bot"), Some(&1));
        assert_eq!(breakdown.get("desktop"), Some(&1));
    }

    #[test]
    fn transition_probabilities_sum_per_source() {
        let sessions = vec![
            session(1, &["/a", "/b"], 0, "ua"),
            session(2, &["/a", "/c"], 0, "ua"),
            session(3, &["/a", "/b"], 0, "ua"),
        ];
        let analysis = discoverer().analyze_workflows(&sessions);
        let from_a = &analysis.transitions["/a"];
        assert!((from_a["/b"].probability - 2.0 / 3.0).abs() < 1e-9);
        assert!((from_a["/c"].probability - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(from_a["/b"].count, 2);
        assert!(from_a["/b"].avg_gap_ms > 0.0);
    }

    #[test]
    fn entry_exit_and_drop_off_points() {
        let mut sessions: Vec<Session> = (0..12)
            .map(|i| session(i, &["/home", "/checkout"], 0, "ua"))
            .collect();
        sessions.push(session(100, &["/home", "/checkout", "/done"], 0, "ua"));

        let analysis = discoverer().analyze_workflows(&sessions);
        assert_eq!(analysis.entry_points[0].endpoint, "/home");
        assert_eq!(analysis.exit_points[0].endpoint, "/checkout");

        let checkout = analysis
            .drop_off_points
            .iter()
            .find(|d| d.endpoint == "/checkout")
            .expect("checkout should be a drop-off point");
        assert!(checkout.drop_off_rate > 0.9);
        assert_eq!(checkout.continuations.get("/done"), Some(&1));
    }

    #[test]
    fn jaccard_similarity() {
        let a = WorkflowPattern {
            endpoints: vec!["/a".into(), "/b".into()],
            ..WorkflowPattern::default()
        };
        let b = WorkflowPattern {
            endpoints: vec!["/b".into(), "/c".into()],
            ..WorkflowPattern::default()
        };
        assert!((pattern_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(pattern_similarity(&a, &a), 1.0);
    }
}
