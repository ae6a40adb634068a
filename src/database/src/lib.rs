//! Database layer for the Panacea load generator
//!
//! Read-only access to the Panacea analytics store (ClickHouse). The load
//! generator uses it once, before a run, to harvest real identifiers
//! (sessions, bundles, combos, log messages and per-bundle metadata) so that
//! generated requests reference data that actually exists.

pub mod connections;
pub mod insights;

pub use connections::{ClickHouseConfig, ClickHouseConnection, ClickHouseStats};
pub use insights::{
    BundleMetadataRow, InsightsDao, InsightsSchema, UserSessionRow, MAX_METADATA_BUNDLE_IDS,
};

/// Errors raised by the database layer
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query '{query}' failed: {reason}")]
    Query { query: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl DatabaseError {
    /// Name of the failing query, when the error came from one
    pub fn query_name(&self) -> Option<&str> {
        match self {
            DatabaseError::Query { query, .. } => Some(query),
            _ => None,
        }
    }
}
