//! Database + connection pool tunables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections the maintenance task refills to.
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    /// Validate a connection with a cheap query before handing it out.
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout_ms: 10_000,
            idle_timeout_ms: 300_000,
            test_on_borrow: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("albflow.db"),
            pool: PoolConfig::default(),
        }
    }
}
