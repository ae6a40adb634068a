//! ClickHouse connection management for the Panacea analytics store
//!
//! Wraps the HTTP client, tests the connection on creation and keeps query
//! statistics so slow reference-data harvesting shows up in the logs.

use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::ClickHouseConfig;
use crate::DatabaseError;

/// ClickHouse connection manager for read-only reference queries
pub struct ClickHouseConnection {
    client: Arc<Client>,
    config: ClickHouseConfig,
    stats: Arc<RwLock<ClickHouseStats>>,
}

impl ClickHouseConnection {
    /// Create new ClickHouse connection manager
    pub async fn new(config: ClickHouseConfig) -> Result<Self, DatabaseError> {
        info!("Initializing ClickHouse connection to {}", config.url);

        let mut client = Client::default()
            .with_url(&config.url)
            .with_user(&config.username)
            .with_password(&config.password)
            .with_database(&config.database)
            .with_option("max_execution_time", config.timeout_seconds.to_string())
            .with_option("readonly", "2");

        if config.compression {
            client = client.with_compression(clickhouse::Compression::Lz4);
        }

        let start_time = Instant::now();
        let test_result = client
            .query("SELECT toUInt8(1) AS test")
            .fetch_one::<u8>()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("ClickHouse connection test failed: {}", e))
            })?;

        if test_result != 1 {
            return Err(DatabaseError::Connection(
                "ClickHouse connection test returned unexpected result".to_string(),
            ));
        }

        info!(
            "ClickHouse connection established successfully in {:?}",
            start_time.elapsed()
        );

        Ok(Self {
            client: Arc::new(client),
            config,
            stats: Arc::new(RwLock::new(ClickHouseStats::default())),
        })
    }

    /// Execute a named query and return all rows.
    ///
    /// `name` identifies the query in logs and in [`DatabaseError::Query`].
    pub async fn query<T>(&self, name: &str, sql: &str) -> Result<Vec<T>, DatabaseError>
    where
        T: Row + for<'b> Deserialize<'b>,
    {
        let start_time = Instant::now();
        debug!(query = name, "Executing ClickHouse query: {}", sql);

        let result = self.client.query(sql).fetch_all::<T>().await;
        let query_time = start_time.elapsed();

        {
            let mut stats = self.stats.write().await;
            stats.queries_executed += 1;
            stats.total_query_time_ms += query_time.as_millis() as u64;
            if result.is_err() {
                stats.query_errors += 1;
            }
        }

        if query_time.as_millis() as u64 > self.config.slow_query_threshold_ms {
            warn!(
                query = name,
                "Slow ClickHouse query detected: {}ms",
                query_time.as_millis()
            );
        }

        match result {
            Ok(rows) => {
                debug!(query = name, rows = rows.len(), "Query executed in {:?}", query_time);
                Ok(rows)
            }
            Err(e) => {
                error!(query = name, "ClickHouse query failed: {}", e);
                Err(DatabaseError::Query {
                    query: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Query statistics collected so far
    pub async fn get_stats(&self) -> ClickHouseStats {
        self.stats.read().await.clone()
    }
}

/// ClickHouse connection statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickHouseStats {
    pub queries_executed: u64,
    pub total_query_time_ms: u64,
    pub query_errors: u64,
}

impl ClickHouseStats {
    pub fn average_query_time_ms(&self) -> f64 {
        if self.queries_executed > 0 {
            self.total_query_time_ms as f64 / self.queries_executed as f64
        } else {
            0.0
        }
    }
}
