//! Session reconstruction: group requests by client IP, split on
//! inactivity gaps and on session-token changes.

use albflow_core::config::SessionConfig;
use albflow_core::models::{LogRecord, Session, SessionRequest};
use albflow_aggregate::UrlNormalizer;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::warn;

pub struct SessionReconstructor {
    config: SessionConfig,
    token_patterns: Vec<Regex>,
    normalizer: UrlNormalizer,
}

impl SessionReconstructor {
    /// Compile the configured token patterns; unparseable patterns are
    /// dropped with a warning rather than failing the whole analysis.
    pub fn new(config: SessionConfig) -> Self {
        let token_patterns = config
            .session_identifier_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("ignoring bad session identifier pattern {p:?}: {e}");
                    None
                }
            })
            .collect();
        Self {
            config,
            token_patterns,
            normalizer: UrlNormalizer::new(),
        }
    }

    /// First matching pattern wins; the first capture group is the token.
    pub fn extract_session_token(&self, url: &str) -> Option<String> {
        for pattern in &self.token_patterns {
            if let Some(captures) = pattern.captures(url) {
                if let Some(token) = captures.get(1) {
                    return Some(token.as_str().to_string());
                }
            }
        }
        None
    }

    /// Rebuild sessions from raw records. Records are grouped by client
    /// IP and walked in timestamp order; a gap above the inactivity
    /// limit, or a different extracted token, starts a new session.
    pub fn reconstruct(&self, records: &[LogRecord]) -> Vec<Session> {
        let max_gap_micros = self.config.max_inactivity_minutes as i64 * 60 * 1_000_000;

        let mut by_client: FxHashMap<String, Vec<&LogRecord>> = FxHashMap::default();
        for record in records {
            by_client
                .entry(record.client_ip.to_string())
                .or_default()
                .push(record);
        }

        let mut sessions = Vec::new();
        for (client_ip, mut client_records) in by_client {
            client_records.sort_by_key(|r| (r.timestamp, r.id));

            let mut current: Vec<&LogRecord> = Vec::new();
            let mut current_token: Option<String> = None;

            for record in client_records {
                let token = self.extract_session_token(&record.request_url);
                let split = match current.last() {
                    None => false,
                    Some(previous) => {
                        let gap = record.timestamp.timestamp_micros()
                            - previous.timestamp.timestamp_micros();
                        gap > max_gap_micros
                            || matches!(
                                (&current_token, &token),
                                (Some(a), Some(b)) if a != b
                            )
                    }
                };

                if split {
                    self.finish_session(&client_ip, &current, &current_token, &mut sessions);
                    current.clear();
                    current_token = None;
                }

                if current_token.is_none() {
                    current_token = token;
                }
                current.push(record);
            }
            self.finish_session(&client_ip, &current, &current_token, &mut sessions);
        }

        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.client_ip.cmp(&b.client_ip))
        });
        sessions
    }

    fn finish_session(
        &self,
        client_ip: &str,
        records: &[&LogRecord],
        token: &Option<String>,
        sessions: &mut Vec<Session>,
    ) {
        if records.len() < self.config.min_requests_per_session.max(1) {
            return;
        }

        let requests: Vec<SessionRequest> = records
            .iter()
            .map(|r| SessionRequest {
                timestamp: r.timestamp,
                endpoint: self.normalizer.normalize(&r.request_url),
                verb: r.request_verb.clone(),
                status: r.elb_status_code,
                response_time_ms: r.total_processing_ms(),
                user_agent: r.user_agent.clone(),
                bytes: r.received_bytes + r.sent_bytes,
            })
            .collect();

        let start_time = requests[0].timestamp;
        let end_time = requests[requests.len() - 1].timestamp;
        sessions.push(Session {
            session_id: Session::id_for(client_ip, start_time),
            client_ip: client_ip.to_string(),
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            error_count: records.iter().filter(|r| r.is_error()).count() as u64,
            total_bytes: requests.iter().map(|r| r.bytes).sum(),
            session_token: token.clone(),
            requests,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(minute: i64, url: &str, ip: &str) -> LogRecord {
        let timestamp = Utc.with_ymd_and_hms(2023, 12, 1, 10, 0, 0).unwrap()
            + Duration::minutes(minute);
        LogRecord {
            id: minute,
            timestamp,
            client_ip: ip.parse().unwrap(),
            client_port: 1,
            target_ip: None,
            target_port: 0,
            request_processing_time: 0.001,
            target_processing_time: 0.01,
            response_processing_time: 0.001,
            elb_status_code: 200,
            target_status_code: 200,
            received_bytes: 10,
            sent_bytes: 20,
            request_verb: "GET".into(),
            request_url: url.into(),
            request_protocol: "HTTP/1.1".into(),
            user_agent: "ua".into(),
            ssl_cipher: String::new(),
            ssl_protocol: String::new(),
            target_group_arn: "tg".into(),
            trace_id: "t".into(),
            domain_name: "d".into(),
            chosen_cert_arn: String::new(),
            matched_rule_priority: 0,
            request_creation_time: timestamp,
            actions_executed: String::new(),
            redirect_url: String::new(),
            error_reason: String::new(),
            target_port_list: String::new(),
            target_status_code_list: String::new(),
            classification: String::new(),
            classification_reason: String::new(),
            connection_id: String::new(),
            created_at: chrono::DateTime::UNIX_EPOCH,
        }
    }

    fn reconstructor() -> SessionReconstructor {
        SessionReconstructor::new(SessionConfig::default())
    }

    #[test]
    fn requests_within_the_gap_share_a_session() {
        let records = vec![
            record(0, "/a", "1.1.1.1"),
            record(10, "/b", "1.1.1.1"),
            record(29, "/c", "1.1.1.1"),
        ];
        let sessions = reconstructor().reconstruct(&records);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].requests.len(), 3);
        assert_eq!(sessions[0].duration_ms, 29 * 60 * 1000);
    }

    #[test]
    fn a_gap_above_the_limit_splits_sessions() {
        let records = vec![record(0, "/a", "1.1.1.1"), record(31, "/b", "1.1.1.1")];
        let sessions = reconstructor().reconstruct(&records);
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn different_clients_never_share_sessions() {
        let records = vec![record(0, "/a", "1.1.1.1"), record(1, "/a", "2.2.2.2")];
        let sessions = reconstructor().reconstruct(&records);
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn token_change_splits_sessions() {
        let records = vec![
            record(0, "/a?sid=alpha", "1.1.1.1"),
            record(1, "/b", "1.1.1.1"),
            record(2, "/c?sid=beta", "1.1.1.1"),
        ];
        let sessions = reconstructor().reconstruct(&records);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_token.as_deref(), Some("alpha"));
        assert_eq!(sessions[1].session_token.as_deref(), Some("beta"));
    }

    #[test]
    fn token_extraction_patterns_in_order() {
        let r = reconstructor();
        assert_eq!(
            r.extract_session_token("/app?jsessionid=J123&x=1").as_deref(),
            Some("J123")
        );
        assert_eq!(
            r.extract_session_token("/app;jsessionid=PATH123").as_deref(),
            Some("PATH123")
        );
        assert_eq!(
            r.extract_session_token("/api/session/s-42/cart").as_deref(),
            Some("s-42")
        );
        assert_eq!(
            r.extract_session_token("/api/sessions/s-43").as_deref(),
            Some("s-43")
        );
        assert_eq!(r.extract_session_token("/plain/path"), None);
    }

    #[test]
    fn endpoints_are_normalised_and_times_summed() {
        let sessions = reconstructor().reconstruct(&[record(0, "/users/42?x=1", "1.1.1.1")]);
        let request = &sessions[0].requests[0];
        assert_eq!(request.endpoint, "/users/{id}");
        assert!((request.response_time_ms - 12.0).abs() < 1e-9);
    }

    #[test]
    fn short_sessions_are_dropped_when_configured() {
        let config = SessionConfig {
            min_requests_per_session: 2,
            ..SessionConfig::default()
        };
        let sessions = SessionReconstructor::new(config).reconstruct(&[
            record(0, "/a", "1.1.1.1"),
            record(40, "/b", "1.1.1.1"),
        ]);
        assert!(sessions.is_empty());
    }
}
