//! Error taxonomy for the load generator.
//!
//! Everything except [`LoadTestError::GenerationInvariantViolation`] is fatal
//! at startup. A generation violation only aborts the current user turn.

use std::path::PathBuf;

use panacea_database::DatabaseError;

pub type Result<T, E = LoadTestError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data source unavailable ({query}): {reason}")]
    DataSourceUnavailable { query: String, reason: String },

    #[error("Fixture not found: {}", .0.display())]
    FixtureNotFound(PathBuf),

    #[error("Fixture {} is malformed: {reason}", .path.display())]
    FixtureMalformed { path: PathBuf, reason: String },

    #[error("Failed to write fixture {}: {source}", .path.display())]
    FixtureWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write run summary {}: {source}", .path.display())]
    SummaryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Generation invariant violated: {0}")]
    GenerationInvariantViolation(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LoadTestError {
    pub fn config(message: impl Into<String>) -> Self {
        LoadTestError::Configuration(message.into())
    }

    pub fn unavailable(query: impl Into<String>, reason: impl ToString) -> Self {
        LoadTestError::DataSourceUnavailable {
            query: query.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        LoadTestError::GenerationInvariantViolation(message.into())
    }

    /// Whether the error must stop the whole run rather than a single turn.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LoadTestError::GenerationInvariantViolation(_))
    }
}

impl From<DatabaseError> for LoadTestError {
    fn from(err: DatabaseError) -> Self {
        if let DatabaseError::Validation(reason) = err {
            return LoadTestError::Configuration(reason);
        }
        let query = err.query_name().unwrap_or("clickhouse_connection").to_string();
        LoadTestError::DataSourceUnavailable {
            query,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_generation_violations_are_recoverable() {
        assert!(!LoadTestError::invariant("empty pool").is_fatal());
        assert!(LoadTestError::config("bad weights").is_fatal());
        assert!(LoadTestError::FixtureNotFound(PathBuf::from("payload.json")).is_fatal());
    }

    #[test]
    fn test_database_error_names_failing_query() {
        let err: LoadTestError = DatabaseError::Query {
            query: "valid_combo_ids".to_string(),
            reason: "timeout".to_string(),
        }
        .into();

        match err {
            LoadTestError::DataSourceUnavailable { query, .. } => {
                assert_eq!(query, "valid_combo_ids")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_database_validation_is_a_configuration_error() {
        let err: LoadTestError =
            DatabaseError::Validation("too many bundle ids".to_string()).into();
        assert!(matches!(err, LoadTestError::Configuration(ref reason) if reason == "too many bundle ids"));
        assert!(err.is_fatal());
    }
}
