//! Database connection management
//!
//! Holds the ClickHouse connection configuration.

pub mod clickhouse;

use serde::{Deserialize, Serialize};

pub use self::clickhouse::{ClickHouseConnection, ClickHouseStats};

/// ClickHouse configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
    pub compression: bool,
    /// Queries slower than this are logged at warn level
    pub slow_query_threshold_ms: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "panacea".to_string(),
            username: "default".to_string(),
            password: "".to_string(),
            timeout_seconds: 30,
            compression: true,
            slow_query_threshold_ms: 1000,
        }
    }
}
