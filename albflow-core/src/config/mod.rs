pub mod analysis_config;
pub mod database_config;
pub mod ingestion_config;
pub mod pattern_config;
pub mod session_config;

use serde::{Deserialize, Serialize};

pub use analysis_config::{AnalysisConfig, AnalysisConfigPatch};
pub use database_config::{DatabaseConfig, PoolConfig};
pub use ingestion_config::IngestionConfig;
pub use pattern_config::PatternConfig;
pub use session_config::SessionConfig;

/// Top-level configuration aggregating all subsystem configs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AlbFlowConfig {
    pub database: DatabaseConfig,
    pub ingestion: IngestionConfig,
    pub analysis: AnalysisConfig,
    pub session: SessionConfig,
    pub pattern: PatternConfig,
}

impl AlbFlowConfig {
    /// Load config from a TOML string, falling back to defaults for
    /// missing fields.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}
