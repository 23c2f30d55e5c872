use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Gap above which consecutive requests split into two sessions.
    pub max_inactivity_minutes: u64,
    /// Tried in order against the request URL; first match wins.
    pub session_identifier_patterns: Vec<String>,
    pub min_requests_per_session: usize,
}

impl SessionConfig {
    /// The default token patterns, in matching order.
    pub fn default_identifier_patterns() -> Vec<String> {
        [
            r"(?i)[?&]jsessionid=([^&\s]+)",
            r"(?i)[?&]sessionid=([^&\s]+)",
            r"(?i)[?&]sid=([^&\s]+)",
            r"(?i)[?&]session=([^&\s]+)",
            r"(?i);jsessionid=([^;?\s]+)",
            r"(?i)/sessions?/([^/?\s]+)",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_inactivity_minutes: 30,
            session_identifier_patterns: Self::default_identifier_patterns(),
            min_requests_per_session: 1,
        }
    }
}
