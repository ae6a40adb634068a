//! Tests for reference-data query construction and connection configuration

use panacea_database::{ClickHouseConfig, DatabaseError, InsightsSchema, MAX_METADATA_BUNDLE_IDS};
use pretty_assertions::assert_eq;

#[test]
fn test_custom_schema_is_used_in_every_query() {
    let schema = InsightsSchema {
        database: "staging".to_string(),
        ..InsightsSchema::default()
    };

    for sql in [
        schema.sessions_sql(10),
        schema.bundle_ids_sql(10),
        schema.combo_ids_sql(10),
        schema.messages_sql(100, 10),
        schema.bundle_metadata_sql(&[1]).unwrap(),
    ] {
        assert!(sql.contains("staging."), "query not scoped to schema: {}", sql);
        assert!(!sql.contains("panacea."), "query leaked default schema: {}", sql);
    }
}

#[test]
fn test_sessions_query_only_returns_unexpired_sessions() {
    let sql = InsightsSchema::default().sessions_sql(1000);
    assert!(sql.contains("s.expires_at > now()"));
    assert!(sql.contains("LIMIT 1000"));
}

#[test]
fn test_messages_query_is_length_bounded() {
    let sql = InsightsSchema::default().messages_sql(100, 20);
    assert!(sql.contains("length(message) < 100"));
    assert!(sql.contains("DISTINCT message"));
    assert!(sql.ends_with("LIMIT 20"));
}

#[test]
fn test_combo_ids_are_distinct_random_sample() {
    let sql = InsightsSchema::default().combo_ids_sql(100);
    assert!(sql.contains("DISTINCT"));
    assert!(sql.contains("ORDER BY rand()"));
}

#[test]
fn test_clickhouse_config_serialization() {
    let config = ClickHouseConfig::default();

    let json = serde_json::to_string(&config).unwrap();
    let deserialized: ClickHouseConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(config.url, deserialized.url);
    assert_eq!(config.database, deserialized.database);
    assert_eq!(config.compression, deserialized.compression);
}

#[test]
fn test_bundle_metadata_rejects_empty_id_list() {
    let err = InsightsSchema::default().bundle_metadata_sql(&[]).unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));
    assert_eq!(
        err.to_string(),
        "Validation error: bundle metadata needs at least one bundle id"
    );
}

#[test]
fn test_bundle_metadata_rejects_oversized_id_list() {
    let schema = InsightsSchema::default();
    let at_limit: Vec<u64> = (0..MAX_METADATA_BUNDLE_IDS as u64).collect();
    assert!(schema.bundle_metadata_sql(&at_limit).is_ok());

    let oversized: Vec<u64> = (0..=MAX_METADATA_BUNDLE_IDS as u64).collect();
    let err = schema.bundle_metadata_sql(&oversized).unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));
    assert!(err.query_name().is_none());
}
