//! Analysis orchestrator tunables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Above this record count the full in-memory path is off the table.
    pub max_sessions_for_full_analysis: u64,
    pub use_sampling: bool,
    /// Bernoulli keep-probability on the streaming path.
    pub sampling_rate: f64,
    pub use_aggregation_tables: bool,
    pub streaming_batch_size: usize,
    /// Analysis aborts with partial data past this budget.
    pub max_processing_time_ms: u64,
    pub enable_caching: bool,
    pub cache_expiry_ms: u64,
    pub max_cached_results: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_sessions_for_full_analysis: 10_000,
            use_sampling: true,
            sampling_rate: 0.1,
            use_aggregation_tables: true,
            streaming_batch_size: 5_000,
            max_processing_time_ms: 300_000,
            enable_caching: true,
            cache_expiry_ms: 1_800_000,
            max_cached_results: 10,
        }
    }
}

/// Partial update applied by `update_config`; `None` leaves a field as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfigPatch {
    pub max_sessions_for_full_analysis: Option<u64>,
    pub use_sampling: Option<bool>,
    pub sampling_rate: Option<f64>,
    pub use_aggregation_tables: Option<bool>,
    pub streaming_batch_size: Option<usize>,
    pub max_processing_time_ms: Option<u64>,
    pub enable_caching: Option<bool>,
    pub cache_expiry_ms: Option<u64>,
}

impl AnalysisConfig {
    pub fn apply(&mut self, patch: &AnalysisConfigPatch) {
        if let Some(v) = patch.max_sessions_for_full_analysis {
            self.max_sessions_for_full_analysis = v;
        }
        if let Some(v) = patch.use_sampling {
            self.use_sampling = v;
        }
        if let Some(v) = patch.sampling_rate {
            self.sampling_rate = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.use_aggregation_tables {
            self.use_aggregation_tables = v;
        }
        if let Some(v) = patch.streaming_batch_size {
            self.streaming_batch_size = v.max(1);
        }
        if let Some(v) = patch.max_processing_time_ms {
            self.max_processing_time_ms = v;
        }
        if let Some(v) = patch.enable_caching {
            self.enable_caching = v;
        }
        if let Some(v) = patch.cache_expiry_ms {
            self.cache_expiry_ms = v;
        }
    }
}
