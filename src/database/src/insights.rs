//! Reference-data queries against the Panacea insights schema
//!
//! Every query here is read-only. Identifiers are sampled with
//! `ORDER BY rand()` so repeated harvests spread load over different bundles.

use clickhouse::Row;
use serde::Deserialize;
use tracing::info;

use crate::connections::ClickHouseConnection;
use crate::DatabaseError;

/// Largest id list a single metadata query may carry
pub const MAX_METADATA_BUNDLE_IDS: usize = 10_000;

/// Table names used by the DAO.
#[derive(Debug, Clone)]
pub struct InsightsSchema {
    pub database: String,
    pub users_table: String,
    pub sessions_table: String,
    pub metadata_table: String,
    pub multi_bundle_table: String,
    pub logs_table: String,
}

impl Default for InsightsSchema {
    fn default() -> Self {
        Self {
            database: "panacea".to_string(),
            users_table: "nu_users".to_string(),
            sessions_table: "nu_sessions".to_string(),
            metadata_table: "nu_metadata".to_string(),
            multi_bundle_table: "nu_multi_bundle".to_string(),
            logs_table: "nu_logs_local".to_string(),
        }
    }
}

impl InsightsSchema {
    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.database, name)
    }

    pub fn sessions_sql(&self, limit: u32) -> String {
        format!(
            "SELECT toString(u.id) AS user_id, toString(s.session_id) AS session_id \
             FROM {} AS u INNER JOIN {} AS s ON u.id = s.user_id \
             WHERE s.expires_at > now() LIMIT {}",
            self.table(&self.users_table),
            self.table(&self.sessions_table),
            limit
        )
    }

    pub fn bundle_ids_sql(&self, limit: u32) -> String {
        format!(
            "SELECT toUInt64(id) AS id FROM {} WHERE is_deleted = 0 ORDER BY rand() LIMIT {}",
            self.table(&self.metadata_table),
            limit
        )
    }

    pub fn combo_ids_sql(&self, limit: u32) -> String {
        format!(
            "SELECT combo_id FROM (SELECT DISTINCT toUInt64(multi_bundle_id) AS combo_id FROM {}) \
             ORDER BY rand() LIMIT {}",
            self.table(&self.multi_bundle_table),
            limit
        )
    }

    pub fn messages_sql(&self, max_length: u32, limit: u32) -> String {
        format!(
            "SELECT DISTINCT message FROM {} WHERE length(message) < {} LIMIT {}",
            self.table(&self.logs_table),
            max_length,
            limit
        )
    }

    /// Batch metadata query for all `bundle_ids` at once.
    ///
    /// An empty list would render `IN ()`, which ClickHouse rejects.
    pub fn bundle_metadata_sql(&self, bundle_ids: &[u64]) -> Result<String, DatabaseError> {
        if bundle_ids.is_empty() {
            return Err(DatabaseError::Validation(
                "bundle metadata needs at least one bundle id".to_string(),
            ));
        }
        if bundle_ids.len() > MAX_METADATA_BUNDLE_IDS {
            return Err(DatabaseError::Validation(format!(
                "{} bundle ids exceed the metadata limit of {}",
                bundle_ids.len(),
                MAX_METADATA_BUNDLE_IDS
            )));
        }

        let ids = bundle_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Ok(format!(
            "SELECT toUInt64(bundle_id) AS bundle_id, \
             groupUniqArray(component) AS components, \
             groupUniqArray(source_log_filename) AS source_log_filenames, \
             formatDateTime(min(timestamp), '%Y-%m-%d %H:%i:%S') AS start_time, \
             formatDateTime(max(timestamp), '%Y-%m-%d %H:%i:%S') AS end_time \
             FROM {} WHERE bundle_id IN ({}) GROUP BY bundle_id",
            self.table(&self.logs_table),
            ids
        ))
    }
}

/// A user with a non-expired session
#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct UserSessionRow {
    pub user_id: String,
    pub session_id: String,
}

/// Aggregated log metadata for one bundle
#[derive(Debug, Clone, PartialEq, Row, Deserialize)]
pub struct BundleMetadataRow {
    pub bundle_id: u64,
    pub components: Vec<String>,
    pub source_log_filenames: Vec<String>,
    /// `YYYY-MM-DD HH:MM:SS`
    pub start_time: String,
    /// `YYYY-MM-DD HH:MM:SS`
    pub end_time: String,
}

#[derive(Row, Deserialize)]
struct IdRow {
    id: u64,
}

#[derive(Row, Deserialize)]
struct ComboRow {
    combo_id: u64,
}

#[derive(Row, Deserialize)]
struct MessageRow {
    message: String,
}

/// Data access object for the insights reference tables
pub struct InsightsDao {
    connection: ClickHouseConnection,
    schema: InsightsSchema,
}

impl InsightsDao {
    pub fn new(connection: ClickHouseConnection, schema: InsightsSchema) -> Self {
        Self { connection, schema }
    }

    pub fn connection(&self) -> &ClickHouseConnection {
        &self.connection
    }

    /// Fetch active user/session pairs.
    pub async fn users_and_sessions(&self, limit: u32) -> Result<Vec<UserSessionRow>, DatabaseError> {
        info!("Fetching users and sessions with limit: {}", limit);
        self.connection
            .query("users_and_sessions", &self.schema.sessions_sql(limit))
            .await
    }

    pub async fn valid_bundle_ids(&self, limit: u32) -> Result<Vec<u64>, DatabaseError> {
        let rows: Vec<IdRow> = self
            .connection
            .query("valid_bundle_ids", &self.schema.bundle_ids_sql(limit))
            .await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    pub async fn valid_combo_ids(&self, limit: u32) -> Result<Vec<u64>, DatabaseError> {
        let rows: Vec<ComboRow> = self
            .connection
            .query("valid_combo_ids", &self.schema.combo_ids_sql(limit))
            .await?;
        Ok(rows.into_iter().map(|r| r.combo_id).collect())
    }

    pub async fn short_messages(
        &self,
        max_length: u32,
        limit: u32,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<MessageRow> = self
            .connection
            .query("short_messages", &self.schema.messages_sql(max_length, limit))
            .await?;
        Ok(rows.into_iter().map(|r| r.message).collect())
    }

    /// Fetch metadata for every bundle in one round trip.
    pub async fn bundle_metadata(
        &self,
        bundle_ids: &[u64],
    ) -> Result<Vec<BundleMetadataRow>, DatabaseError> {
        if bundle_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.schema.bundle_metadata_sql(bundle_ids)?;
        self.connection.query("bundle_metadata", &sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_metadata_sql_lists_ids() {
        let sql = InsightsSchema::default()
            .bundle_metadata_sql(&[101, 102])
            .unwrap();
        assert!(sql.contains("IN (101,102)"));
        assert!(sql.contains("panacea.nu_logs_local"));
        assert!(sql.contains("GROUP BY bundle_id"));
    }

    #[test]
    fn test_bundle_ids_sql_filters_deleted() {
        let sql = InsightsSchema::default().bundle_ids_sql(500);
        assert!(sql.contains("is_deleted = 0"));
        assert!(sql.ends_with("LIMIT 500"));
    }
}
