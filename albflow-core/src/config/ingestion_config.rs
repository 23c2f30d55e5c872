use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Records per transactional insert.
    pub batch_size: usize,
    /// 1 for line-accurate ingest; the throughput processor uses 4.
    pub max_concurrent_files: usize,
    /// Skip malformed lines (warning) instead of failing the result.
    pub skip_malformed_lines: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_files: 1,
            skip_malformed_lines: true,
        }
    }
}
