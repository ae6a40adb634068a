//! In-memory snapshot of the reference data used to build requests.
//!
//! A [`DataPool`] is built once before any virtual user starts and is shared
//! read-only (behind an `Arc`) for the whole run. Payload generators only
//! ever draw identifiers from it, never invent them.

use chrono::NaiveDateTime;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{LoadTestError, Result};

pub type BundleId = u64;
pub type ComboId = u64;

/// Timestamp layout used by the fixture for bundle time spans
pub const FIXTURE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log metadata for one bundle.
///
/// `start_time <= end_time` is not guaranteed by upstream data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    pub components: Vec<String>,
    pub source_log_filenames: Vec<String>,
    #[serde(with = "fixture_time")]
    pub start_time: NaiveDateTime,
    #[serde(with = "fixture_time")]
    pub end_time: NaiveDateTime,
}

/// Reference identifiers available to payload generators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPool {
    pub bundle_ids: Vec<BundleId>,
    pub combo_ids: Vec<ComboId>,
    pub session_ids: Vec<String>,
    pub case_owner_emails: Vec<String>,
    pub sfdc_case_numbers: Vec<String>,
    pub messages: Vec<String>,
    pub log_level_types: Vec<String>,
    /// Keyed by bundle id; serialized with the id as a string key
    pub bundle_data: BTreeMap<BundleId, BundleMeta>,
}

impl DataPool {
    /// Read a pool from a fixture file
    pub fn from_fixture(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadTestError::FixtureNotFound(path.to_path_buf())
            } else {
                LoadTestError::FixtureMalformed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;
        Self::parse_fixture(&content, path)
    }

    /// Parse fixture content; `path` is only used in error messages
    pub fn parse_fixture(content: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| LoadTestError::FixtureMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Serialize the pool to fixture form
    pub fn to_fixture_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LoadTestError::invariant(format!("pool serialization failed: {}", e)))
    }

    /// Write the pool to `path`, creating parent directories as needed
    pub fn write_fixture(&self, path: &Path) -> Result<()> {
        let content = self.to_fixture_string()?;
        let write_error = |source| LoadTestError::FixtureWrite {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, content).map_err(write_error)?;

        info!(path = %path.display(), "Data pool written to fixture");
        Ok(())
    }

    /// Bundle ids that have metadata attached, usable by log viewer endpoints
    pub fn log_viewer_bundle_ids(&self) -> Vec<BundleId> {
        self.bundle_data.keys().copied().collect()
    }

    pub fn bundle_meta(&self, bundle_id: BundleId) -> Option<&BundleMeta> {
        self.bundle_data.get(&bundle_id)
    }

    pub fn log_summary(&self) {
        info!(
            bundle_ids = self.bundle_ids.len(),
            combo_ids = self.combo_ids.len(),
            session_ids = self.session_ids.len(),
            case_owner_emails = self.case_owner_emails.len(),
            sfdc_case_numbers = self.sfdc_case_numbers.len(),
            messages = self.messages.len(),
            log_level_types = self.log_level_types.len(),
            bundles_with_metadata = self.bundle_data.len(),
            "Data pool ready"
        );
    }
}

/// Uniformly choose one element, failing the turn when the pool has none.
pub(crate) fn choose<'a, T, R>(items: &'a [T], what: &str, rng: &mut R) -> Result<&'a T>
where
    R: Rng + ?Sized,
{
    items
        .choose(rng)
        .ok_or_else(|| LoadTestError::invariant(format!("data pool has no {}", what)))
}

mod fixture_time {
    use super::FIXTURE_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FIXTURE_TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FIXTURE_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;

    const FIXTURE: &str = r#"{
        "bundle_ids": [101, 102],
        "combo_ids": [1, 2],
        "session_ids": ["cf811e567c5d42e9bd61a3562ecdd29f"],
        "case_owner_emails": ["owner@example.com"],
        "sfdc_case_numbers": ["00123456"],
        "messages": ["acropolis crashing in loop"],
        "log_level_types": ["info", "error"],
        "bundle_data": {
            "101": {
                "components": ["acropolis", "stargate"],
                "source_log_filenames": ["acropolis.out"],
                "start_time": "2024-01-01 00:00:00",
                "end_time": "2024-01-02 12:30:00"
            }
        }
    }"#;

    fn fixture_path() -> PathBuf {
        PathBuf::from("payload.json")
    }

    #[test]
    fn test_parse_fixture() {
        let pool = DataPool::parse_fixture(FIXTURE, &fixture_path()).unwrap();
        assert_eq!(pool.bundle_ids, vec![101, 102]);
        assert_eq!(pool.log_viewer_bundle_ids(), vec![101]);

        let meta = pool.bundle_meta(101).unwrap();
        assert_eq!(meta.components, vec!["acropolis", "stargate"]);
        assert_eq!(
            meta.end_time.format(FIXTURE_TIME_FORMAT).to_string(),
            "2024-01-02 12:30:00"
        );
    }

    #[test]
    fn test_missing_key_is_malformed() {
        let content = FIXTURE.replace("\"messages\"", "\"notes\"");
        let err = DataPool::parse_fixture(&content, &fixture_path()).unwrap_err();
        match err {
            LoadTestError::FixtureMalformed { reason, .. } => assert!(reason.contains("messages")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let content = FIXTURE.replace("[101, 102]", "\"101,102\"");
        assert!(matches!(
            DataPool::parse_fixture(&content, &fixture_path()),
            Err(LoadTestError::FixtureMalformed { .. })
        ));
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        let content = FIXTURE.replace("2024-01-01 00:00:00", "2024-01-01T00:00:00Z");
        assert!(matches!(
            DataPool::parse_fixture(&content, &fixture_path()),
            Err(LoadTestError::FixtureMalformed { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let missing = PathBuf::from("/nonexistent/panacea/payload.json");
        assert!(matches!(
            DataPool::from_fixture(&missing),
            Err(LoadTestError::FixtureNotFound(_))
        ));
    }

    #[test]
    fn test_bundle_ids_serialize_as_string_keys() {
        let pool = DataPool::parse_fixture(FIXTURE, &fixture_path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&pool.to_fixture_string().unwrap()).unwrap();
        assert!(value["bundle_data"]["101"].is_object());
        assert_eq!(value["bundle_data"]["101"]["start_time"], "2024-01-01 00:00:00");
    }

    #[test]
    fn test_choose_from_empty_is_invariant_violation() {
        let mut rng = StdRng::seed_from_u64(7);
        let empty: Vec<String> = Vec::new();
        let err = choose(&empty, "messages", &mut rng).unwrap_err();
        assert!(!err.is_fatal());
    }
}
