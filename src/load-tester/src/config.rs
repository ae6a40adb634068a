//! # Load Tester Configuration Module
//!
//! Configuration for the Panacea load generator. Supports YAML files,
//! environment variable overrides and programmatic configuration.

use panacea_database::{ClickHouseConfig, MAX_METADATA_BUNDLE_IDS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{LoadTestError, Result};
use crate::scheduler::{TaskKind, WeightedTaskScheduler};

/// Main load tester configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// Target API and per-request settings
    pub general: GeneralConfig,
    /// Virtual user population
    pub load: LoadProfileConfig,
    /// Where the data pool comes from
    pub data_source: DataSourceConfig,
    /// Per-user identifier ranges
    pub ranges: IdRangeConfig,
    /// Pagination defaults used by payload generators
    pub pagination: PaginationConfig,
    /// Task weight profiles
    pub task_weights: TaskWeightsConfig,
    /// Run summary output
    pub reporting: ReportingConfig,
}

/// Target API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Base URL of the Panacea API
    pub host: String,
    /// Header carrying the virtual user's session id
    pub session_header_name: String,
    /// User agent sent with every request
    pub user_agent: String,
    /// Request timeout in seconds
    pub request_timeout_seconds: f64,
    /// Minimum think time between requests (seconds)
    pub wait_min_seconds: f64,
    /// Maximum think time between requests (seconds)
    pub wait_max_seconds: f64,
    /// Use this session id for every user instead of sampling the pool
    pub fixed_session_id: Option<String>,
    /// Base seed for per-user RNGs; entropy when absent
    pub seed: Option<u64>,
    /// Chance that a dispatched request is logged as a curl command
    pub curl_log_probability: f64,
}

/// Virtual user population
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadProfileConfig {
    /// Number of concurrent virtual users
    pub users: u32,
    /// Users started per second
    pub spawn_rate: f64,
    /// Test duration in seconds
    pub run_time_seconds: u64,
}

/// Data pool source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceMode {
    /// Read the pool from the fixture file
    Static,
    /// Harvest the pool from ClickHouse and the target API, then write the fixture
    Live,
}

impl FromStr for DataSourceMode {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(DataSourceMode::Static),
            "live" => Ok(DataSourceMode::Live),
            other => Err(LoadTestError::config(format!(
                "unknown data source mode '{}'",
                other
            ))),
        }
    }
}

/// Data pool source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub mode: DataSourceMode,
    /// Fixture read in static mode and written in live mode
    pub fixture_path: PathBuf,
    pub users_limit: u32,
    pub bundle_ids_limit: u32,
    pub combo_ids_limit: u32,
    pub messages_limit: u32,
    /// Only log messages shorter than this are sampled
    pub message_max_length: u32,
    /// Distinct case owner emails harvested from the reports listing
    pub case_owner_emails_required: usize,
    /// Distinct SFDC case numbers harvested from the reports listing
    pub sfdc_case_numbers_required: usize,
    pub clickhouse: ClickHouseConfig,
}

/// Identifier range partitioning per virtual user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdRangeConfig {
    pub bundle_min: u64,
    pub bundle_max: u64,
    pub bundle_range_per_user: u64,
    /// Fraction of `bundle_range_per_user` added on each side of a user's range
    pub overlap_fraction: f64,
    pub combo_min: u64,
    pub combo_max: u64,
    pub combo_range_per_user: u64,
}

/// Pagination defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// reports and list-combos
    pub list_page_size: u32,
    pub search_page_size: u32,
    pub histogram_page_size: u32,
    /// Page size of the reports call used to harvest emails and case numbers
    pub seed_page_size: u32,
}

/// Named task weight profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskWeightsConfig {
    /// Profile used for selection
    pub active_profile: String,
    /// Profile name -> task name -> weight
    pub profiles: BTreeMap<String, BTreeMap<String, u32>>,
}

/// Run summary output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub results_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:9898".to_string(),
            session_header_name: "X-Session-Id".to_string(),
            user_agent: "PanaceaLoad/1.0".to_string(),
            request_timeout_seconds: 30.0,
            wait_min_seconds: 1.0,
            wait_max_seconds: 3.0,
            fixed_session_id: None,
            seed: None,
            curl_log_probability: 0.1,
        }
    }
}

impl Default for LoadProfileConfig {
    fn default() -> Self {
        Self {
            users: 10,
            spawn_rate: 1.0,
            run_time_seconds: 60,
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            mode: DataSourceMode::Static,
            fixture_path: PathBuf::from("payload.json"),
            users_limit: 1000,
            bundle_ids_limit: 500,
            combo_ids_limit: 100,
            messages_limit: 20,
            message_max_length: 100,
            case_owner_emails_required: 10,
            sfdc_case_numbers_required: 10,
            clickhouse: ClickHouseConfig::default(),
        }
    }
}

impl Default for IdRangeConfig {
    fn default() -> Self {
        Self {
            bundle_min: 1,
            bundle_max: 10_000,
            bundle_range_per_user: 100,
            overlap_fraction: 0.1,
            combo_min: 1,
            combo_max: 1_000,
            combo_range_per_user: 10,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            list_page_size: 20,
            search_page_size: 20,
            histogram_page_size: 100,
            seed_page_size: 20,
        }
    }
}

impl Default for TaskWeightsConfig {
    fn default() -> Self {
        let development = TaskKind::ALL
            .iter()
            .map(|task| {
                let weight = if *task == TaskKind::Reports { 0 } else { 1 };
                (task.name().to_string(), weight)
            })
            .collect();

        let production = TaskKind::ALL
            .iter()
            .map(|task| {
                let weight = match task {
                    TaskKind::Reports | TaskKind::ListCombos => 3,
                    TaskKind::Events | TaskKind::ReportSummary => 2,
                    TaskKind::LogsSearch | TaskKind::LogsHistogram => 2,
                    _ => 1,
                };
                (task.name().to_string(), weight)
            })
            .collect();

        let mut profiles = BTreeMap::new();
        profiles.insert("development".to_string(), development);
        profiles.insert("production".to_string(), production);

        Self {
            active_profile: "development".to_string(),
            profiles,
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            results_dir: PathBuf::from("results"),
        }
    }
}

impl TaskWeightsConfig {
    /// Weights of the active profile
    pub fn active_weights(&self) -> Result<&BTreeMap<String, u32>> {
        self.profiles.get(&self.active_profile).ok_or_else(|| {
            LoadTestError::config(format!(
                "active weight profile '{}' is not defined (available: {})",
                self.active_profile,
                self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

impl LoadTestConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoadTestError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            LoadTestError::config(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Load defaults and apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = LoadTestConfig::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| LoadTestError::config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            LoadTestError::config(format!("cannot write {}: {}", path.as_ref().display(), e))
        })
    }

    /// Override settings from environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override settings from any key lookup; `lookup` returns `None` for unset keys.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PANACEA_HOST") {
            self.general.host = host;
        }
        if let Some(value) = lookup("STANDARD_WAIT_MIN") {
            self.general.wait_min_seconds = parse_env("STANDARD_WAIT_MIN", &value)?;
        }
        if let Some(value) = lookup("STANDARD_WAIT_MAX") {
            self.general.wait_max_seconds = parse_env("STANDARD_WAIT_MAX", &value)?;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT") {
            self.general.request_timeout_seconds = parse_env("REQUEST_TIMEOUT", &value)?;
        }
        if let Some(session_id) = lookup("PANACEA_SESSION_ID") {
            self.general.fixed_session_id = Some(session_id);
        }
        if let Some(path) = lookup("PAYLOAD_JSON_FILE_PATH") {
            self.data_source.fixture_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("USE_DATABASE_DATA") {
            self.data_source.mode = if value.eq_ignore_ascii_case("true") {
                DataSourceMode::Live
            } else {
                DataSourceMode::Static
            };
        }
        if let Some(value) = lookup("DB_USERS_LIMIT") {
            self.data_source.users_limit = parse_env("DB_USERS_LIMIT", &value)?;
        }
        if let Some(value) = lookup("DB_BUNDLE_IDS_LIMIT") {
            self.data_source.bundle_ids_limit = parse_env("DB_BUNDLE_IDS_LIMIT", &value)?;
        }
        if let Some(value) = lookup("DB_COMBO_IDS_LIMIT") {
            self.data_source.combo_ids_limit = parse_env("DB_COMBO_IDS_LIMIT", &value)?;
        }
        if let Some(url) = lookup("CLICKHOUSE_URL") {
            self.data_source.clickhouse.url = url;
        }
        if let Some(database) = lookup("CLICKHOUSE_DATABASE") {
            self.data_source.clickhouse.database = database;
        }
        if let Some(user) = lookup("CLICKHOUSE_USER") {
            self.data_source.clickhouse.username = user;
        }
        if let Some(password) = lookup("CLICKHOUSE_PASSWORD") {
            self.data_source.clickhouse.password = password;
        }
        if let Some(profile) = lookup("PANACEA_WEIGHT_PROFILE") {
            self.task_weights.active_profile = profile;
        }
        Ok(())
    }

    /// Validate configuration. Every problem here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.general.host).map_err(|e| {
            LoadTestError::config(format!("invalid host '{}': {}", self.general.host, e))
        })?;

        if self.general.session_header_name.trim().is_empty() {
            return Err(LoadTestError::config("session header name must not be empty"));
        }
        if seconds("request timeout", self.general.request_timeout_seconds)?.is_zero() {
            return Err(LoadTestError::config("request timeout must be positive"));
        }
        seconds("minimum wait", self.general.wait_min_seconds)?;
        seconds("maximum wait", self.general.wait_max_seconds)?;
        if self.general.wait_min_seconds > self.general.wait_max_seconds {
            return Err(LoadTestError::config(format!(
                "wait time range [{}, {}] is invalid",
                self.general.wait_min_seconds, self.general.wait_max_seconds
            )));
        }
        if !self.general.curl_log_probability.is_finite()
            || !(0.0..=1.0).contains(&self.general.curl_log_probability)
        {
            return Err(LoadTestError::config(
                "curl log probability must be between 0 and 1",
            ));
        }

        if self.load.users == 0 {
            return Err(LoadTestError::config("at least one user is required"));
        }
        if !self.load.spawn_rate.is_finite() || self.load.spawn_rate <= 0.0 {
            return Err(LoadTestError::config(format!(
                "spawn rate must be a positive number, got {}",
                self.load.spawn_rate
            )));
        }
        seconds("spawn interval", 1.0 / self.load.spawn_rate)?;

        self.validate_ranges()?;

        if self.data_source.bundle_ids_limit as usize > MAX_METADATA_BUNDLE_IDS {
            return Err(LoadTestError::config(format!(
                "bundle id limit {} exceeds the metadata query limit of {}",
                self.data_source.bundle_ids_limit, MAX_METADATA_BUNDLE_IDS
            )));
        }

        if self.pagination.list_page_size == 0
            || self.pagination.search_page_size == 0
            || self.pagination.histogram_page_size == 0
            || self.pagination.seed_page_size == 0
        {
            return Err(LoadTestError::config("page sizes must be positive"));
        }

        WeightedTaskScheduler::from_config(&self.task_weights)?;

        Ok(())
    }

    fn validate_ranges(&self) -> Result<()> {
        let ranges = &self.ranges;
        if ranges.bundle_min > ranges.bundle_max {
            return Err(LoadTestError::config(format!(
                "bundle id range min {} exceeds max {}",
                ranges.bundle_min, ranges.bundle_max
            )));
        }
        if ranges.combo_min > ranges.combo_max {
            return Err(LoadTestError::config(format!(
                "combo id range min {} exceeds max {}",
                ranges.combo_min, ranges.combo_max
            )));
        }
        if ranges.bundle_range_per_user == 0 || ranges.combo_range_per_user == 0 {
            return Err(LoadTestError::config("range per user must be positive"));
        }
        if !ranges.overlap_fraction.is_finite()
            || !(0.0..=1.0).contains(&ranges.overlap_fraction)
        {
            return Err(LoadTestError::config(format!(
                "overlap fraction {} must be between 0 and 1",
                ranges.overlap_fraction
            )));
        }
        Ok(())
    }
}

/// Seconds that convert to a [`Duration`]: finite, non-negative, in range
fn seconds(what: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        LoadTestError::config(format!("{} of {} seconds is not a usable duration", what, value))
    })
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LoadTestError::config(format!("{}='{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LoadTestConfig::default();
        assert_eq!(config.general.session_header_name, "X-Session-Id");
        assert_eq!(config.general.wait_min_seconds, 1.0);
        assert_eq!(config.general.wait_max_seconds, 3.0);
        assert_eq!(config.pagination.list_page_size, 20);
        assert_eq!(config.pagination.histogram_page_size, 100);
        assert_eq!(config.data_source.mode, DataSourceMode::Static);
    }

    #[test]
    fn test_config_validation() {
        let config = LoadTestConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_profile_disables_reports() {
        let config = TaskWeightsConfig::default();
        let weights = config.active_weights().unwrap();
        assert_eq!(weights["reports"], 0);
        assert_eq!(weights["logs-search"], 1);
        assert_eq!(weights.len(), TaskKind::ALL.len());
    }

    #[test]
    fn test_invalid_wait_range_rejected() {
        let mut config = LoadTestConfig::default();
        config.general.wait_min_seconds = 5.0;
        assert!(matches!(
            config.validate(),
            Err(LoadTestError::Configuration(_))
        ));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let cases: Vec<(&str, fn(&mut LoadTestConfig))> = vec![
            ("nan wait min", |c| c.general.wait_min_seconds = f64::NAN),
            ("nan wait max", |c| c.general.wait_max_seconds = f64::NAN),
            ("infinite wait max", |c| c.general.wait_max_seconds = f64::INFINITY),
            ("negative wait min", |c| c.general.wait_min_seconds = -1.0),
            ("infinite timeout", |c| c.general.request_timeout_seconds = f64::INFINITY),
            ("nan timeout", |c| c.general.request_timeout_seconds = f64::NAN),
            ("huge timeout", |c| c.general.request_timeout_seconds = 1e300),
            ("nan spawn rate", |c| c.load.spawn_rate = f64::NAN),
            ("infinite spawn rate", |c| c.load.spawn_rate = f64::INFINITY),
            ("vanishing spawn rate", |c| c.load.spawn_rate = 1e-320),
            ("nan curl probability", |c| c.general.curl_log_probability = f64::NAN),
            ("nan overlap", |c| c.ranges.overlap_fraction = f64::NAN),
        ];

        for (label, apply) in cases {
            let mut config = LoadTestConfig::default();
            apply(&mut config);
            assert!(
                matches!(config.validate(), Err(LoadTestError::Configuration(_))),
                "{} was accepted",
                label
            );
        }
    }

    #[test]
    fn test_bundle_limit_capped_by_metadata_query() {
        let mut config = LoadTestConfig::default();
        config.data_source.bundle_ids_limit = MAX_METADATA_BUNDLE_IDS as u32 + 1;
        assert!(matches!(
            config.validate(),
            Err(LoadTestError::Configuration(_))
        ));
    }

    #[test]
    fn test_nan_wait_from_environment_rejected() {
        let mut config = LoadTestConfig::default();
        config
            .apply_overrides(|key| (key == "STANDARD_WAIT_MIN").then(|| "NaN".to_string()))
            .unwrap();
        assert!(config.general.wait_min_seconds.is_nan());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let mut config = LoadTestConfig::default();
        config.ranges.bundle_min = 20_000;
        assert!(config.validate().is_err());

        let mut config = LoadTestConfig::default();
        config.ranges.overlap_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = LoadTestConfig::default();
        config.ranges.combo_range_per_user = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_active_profile_rejected() {
        let mut config = LoadTestConfig::default();
        config.task_weights.active_profile = "staging".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_unknown_weight_key_rejected() {
        let mut config = LoadTestConfig::default();
        config
            .task_weights
            .profiles
            .get_mut("development")
            .unwrap()
            .insert("logs-unknown".to_string(), 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PANACEA_HOST", "http://10.0.0.5:9898"),
            ("STANDARD_WAIT_MIN", "0.5"),
            ("USE_DATABASE_DATA", "TRUE"),
            ("DB_BUNDLE_IDS_LIMIT", "42"),
            ("PANACEA_WEIGHT_PROFILE", "production"),
        ]
        .into_iter()
        .collect();

        let mut config = LoadTestConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.general.host, "http://10.0.0.5:9898");
        assert_eq!(config.general.wait_min_seconds, 0.5);
        assert_eq!(config.data_source.mode, DataSourceMode::Live);
        assert_eq!(config.data_source.bundle_ids_limit, 42);
        assert_eq!(config.task_weights.active_profile, "production");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_parse_failure() {
        let mut config = LoadTestConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "DB_USERS_LIMIT").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(LoadTestError::Configuration(_))));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "general:\n  host: http://panacea.local:9898\nload:\n  users: 50\n";
        let config: LoadTestConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.general.host, "http://panacea.local:9898");
        assert_eq!(config.load.users, 50);
        assert_eq!(config.load.spawn_rate, 1.0);
        assert_eq!(config.general.session_header_name, "X-Session-Id");
    }

    #[test]
    fn test_config_file_operations() {
        let config = LoadTestConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();

        let loaded = LoadTestConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.general.host, loaded.general.host);
        assert_eq!(
            config.task_weights.profiles,
            loaded.task_weights.profiles
        );
    }
}
