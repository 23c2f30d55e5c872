use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// A pattern must appear in at least ⌊sessions · min_support⌋ sessions.
    pub min_support: f64,
    /// Subsequence lengths considered: 2..=max_pattern_length.
    pub max_pattern_length: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_support: 0.01,
            max_pattern_length: 10,
        }
    }
}
