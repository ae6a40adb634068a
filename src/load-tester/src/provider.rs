//! Data pool construction.
//!
//! Static mode reads the fixture. Live mode harvests identifiers from the
//! analytics store, seeds case owner emails and SFDC case numbers from the
//! target's reports listing, fetches bundle metadata in one batch and then
//! writes the fixture. Any failing step aborts the whole build.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use panacea_database::{BundleMetadataRow, ClickHouseConnection, InsightsDao, InsightsSchema};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::config::{DataSourceConfig, DataSourceMode, GeneralConfig};
use crate::data_pool::{BundleId, BundleMeta, DataPool, FIXTURE_TIME_FORMAT};
use crate::error::{LoadTestError, Result};
use crate::scheduler::TaskKind;

/// Log levels offered to log viewer filters in live mode
pub const LIVE_LOG_LEVELS: [&str; 8] = [
    "debug", "info", "warn", "error", "fatal", "critical", "trace", "unknown",
];

/// Read-only source of reference identifiers
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// `(user_id, session_id)` pairs for non-expired sessions
    async fn users_and_sessions(&self, limit: u32) -> Result<Vec<(String, String)>>;

    async fn bundle_ids(&self, limit: u32) -> Result<Vec<BundleId>>;

    async fn combo_ids(&self, limit: u32) -> Result<Vec<u64>>;

    async fn messages(&self, max_length: u32, limit: u32) -> Result<Vec<String>>;

    async fn bundle_metadata(&self, bundle_ids: &[BundleId]) -> Result<Vec<BundleMetadataRow>>;
}

#[async_trait]
impl ReferenceStore for InsightsDao {
    async fn users_and_sessions(&self, limit: u32) -> Result<Vec<(String, String)>> {
        let rows = InsightsDao::users_and_sessions(self, limit).await?;
        Ok(rows.into_iter().map(|r| (r.user_id, r.session_id)).collect())
    }

    async fn bundle_ids(&self, limit: u32) -> Result<Vec<BundleId>> {
        Ok(self.valid_bundle_ids(limit).await?)
    }

    async fn combo_ids(&self, limit: u32) -> Result<Vec<u64>> {
        Ok(self.valid_combo_ids(limit).await?)
    }

    async fn messages(&self, max_length: u32, limit: u32) -> Result<Vec<String>> {
        Ok(self.short_messages(max_length, limit).await?)
    }

    async fn bundle_metadata(&self, bundle_ids: &[BundleId]) -> Result<Vec<BundleMetadataRow>> {
        Ok(InsightsDao::bundle_metadata(self, bundle_ids).await?)
    }
}

/// One row of the reports listing; only the seeded fields are read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportDetail {
    #[serde(default)]
    pub case_owner_email: Option<String>,
    #[serde(default)]
    pub sfdc_case_no: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportsEnvelope {
    api_status: String,
    #[serde(default)]
    report_details: Vec<ReportDetail>,
}

/// Source of report rows used to seed emails and case numbers
#[async_trait]
pub trait ReportSeedSource: Send + Sync {
    async fn fetch_reports(&self, session_id: Option<&str>) -> Result<Vec<ReportDetail>>;
}

/// Seeds from the target API's reports listing
pub struct HttpReportSeedSource {
    client: reqwest::Client,
    url: Url,
    session_header_name: String,
    page_size: u32,
}

impl HttpReportSeedSource {
    pub fn new(general: &GeneralConfig, page_size: u32) -> Result<Self> {
        let url = Url::parse(&general.host)
            .and_then(|host| host.join(TaskKind::Reports.endpoint()))
            .map_err(|e| LoadTestError::config(format!("invalid host '{}': {}", general.host, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(general.request_timeout_seconds))
            .user_agent(general.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            url,
            session_header_name: general.session_header_name.clone(),
            page_size,
        })
    }
}

const SEED_QUERY: &str = "reports_seed";

#[async_trait]
impl ReportSeedSource for HttpReportSeedSource {
    async fn fetch_reports(&self, session_id: Option<&str>) -> Result<Vec<ReportDetail>> {
        let mut request = self
            .client
            .post(self.url.clone())
            .json(&json!({ "page_size": self.page_size, "page_no": 1 }));
        if let Some(session_id) = session_id {
            request = request.header(self.session_header_name.as_str(), session_id);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LoadTestError::unavailable(SEED_QUERY, e))?;

        let envelope: ReportsEnvelope = response
            .json()
            .await
            .map_err(|e| LoadTestError::unavailable(SEED_QUERY, e))?;

        if envelope.api_status != "success" {
            return Err(LoadTestError::unavailable(
                SEED_QUERY,
                format!("api_status was '{}'", envelope.api_status),
            ));
        }

        Ok(envelope.report_details)
    }
}

/// First `emails_required` distinct emails and `numbers_required` distinct
/// case numbers, in first-seen order
pub fn harvest_seeds(
    reports: &[ReportDetail],
    emails_required: usize,
    numbers_required: usize,
) -> (Vec<String>, Vec<String>) {
    let emails = first_distinct(
        reports.iter().filter_map(|r| r.case_owner_email.as_deref()),
        emails_required,
    );
    let numbers = first_distinct(
        reports.iter().filter_map(|r| r.sfdc_case_no.as_deref()),
        numbers_required,
    );
    (emails, numbers)
}

fn first_distinct<'a>(values: impl Iterator<Item = &'a str>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// One session per user; a later row for the same user replaces the earlier one.
pub fn sessions_by_user(pairs: Vec<(String, String)>) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, String> = HashMap::new();
    for (user_id, session_id) in pairs {
        if !latest.contains_key(&user_id) {
            order.push(user_id.clone());
        }
        latest.insert(user_id, session_id);
    }
    order
        .into_iter()
        .filter_map(|user| latest.remove(&user))
        .collect()
}

fn parse_metadata(rows: Vec<BundleMetadataRow>) -> Result<BTreeMap<BundleId, BundleMeta>> {
    let parse = |bundle_id: u64, raw: &str| {
        NaiveDateTime::parse_from_str(raw, FIXTURE_TIME_FORMAT).map_err(|e| {
            LoadTestError::unavailable(
                "bundle_metadata",
                format!("bundle {} has unparsable time '{}': {}", bundle_id, raw, e),
            )
        })
    };

    rows.into_iter()
        .map(|row| {
            let meta = BundleMeta {
                start_time: parse(row.bundle_id, &row.start_time)?,
                end_time: parse(row.bundle_id, &row.end_time)?,
                components: row.components,
                source_log_filenames: row.source_log_filenames,
            };
            Ok((row.bundle_id, meta))
        })
        .collect()
}

/// Builds the [`DataPool`] for a run
pub struct DataPoolProvider {
    config: DataSourceConfig,
}

impl DataPoolProvider {
    pub fn new(config: DataSourceConfig) -> Self {
        Self { config }
    }

    /// Build a pool in `mode`, connecting to the configured sources.
    pub async fn build(
        &self,
        mode: DataSourceMode,
        general: &GeneralConfig,
        seed_page_size: u32,
    ) -> Result<DataPool> {
        match mode {
            DataSourceMode::Static => self.load_static(),
            DataSourceMode::Live => {
                let connection = ClickHouseConnection::new(self.config.clickhouse.clone()).await?;
                let schema = InsightsSchema {
                    database: self.config.clickhouse.database.clone(),
                    ..InsightsSchema::default()
                };
                let store = InsightsDao::new(connection, schema);
                let seeds = HttpReportSeedSource::new(general, seed_page_size)?;
                let pool = self
                    .build_live(&store, &seeds, general.fixed_session_id.as_deref())
                    .await?;

                let stats = store.connection().get_stats().await;
                info!(
                    queries = stats.queries_executed,
                    errors = stats.query_errors,
                    avg_ms = stats.average_query_time_ms(),
                    "ClickHouse harvest statistics"
                );
                Ok(pool)
            }
        }
    }

    pub fn load_static(&self) -> Result<DataPool> {
        info!(path = %self.config.fixture_path.display(), "📂 Loading data pool fixture");
        let pool = DataPool::from_fixture(&self.config.fixture_path)?;
        pool.log_summary();
        Ok(pool)
    }

    /// Harvest a pool and write it to the fixture path.
    ///
    /// The seed call uses `seed_session_id` when given, otherwise the first
    /// harvested session.
    pub async fn build_live(
        &self,
        store: &dyn ReferenceStore,
        seeds: &dyn ReportSeedSource,
        seed_session_id: Option<&str>,
    ) -> Result<DataPool> {
        let config = &self.config;
        info!("🔍 Harvesting data pool from live sources");

        let pairs = store.users_and_sessions(config.users_limit).await?;
        let session_ids = sessions_by_user(pairs);
        if session_ids.is_empty() {
            warn!("No active sessions found; users will need a fixed session id");
        }

        let session_for_seed = seed_session_id.or_else(|| session_ids.first().map(String::as_str));
        let reports = seeds.fetch_reports(session_for_seed).await?;
        let (case_owner_emails, sfdc_case_numbers) = harvest_seeds(
            &reports,
            config.case_owner_emails_required,
            config.sfdc_case_numbers_required,
        );

        let bundle_ids = store.bundle_ids(config.bundle_ids_limit).await?;
        let combo_ids = store.combo_ids(config.combo_ids_limit).await?;
        let messages = store
            .messages(config.message_max_length, config.messages_limit)
            .await?;
        let bundle_data = parse_metadata(store.bundle_metadata(&bundle_ids).await?)?;

        let pool = DataPool {
            bundle_ids,
            combo_ids,
            session_ids,
            case_owner_emails,
            sfdc_case_numbers,
            messages,
            log_level_types: LIVE_LOG_LEVELS.iter().map(|l| l.to_string()).collect(),
            bundle_data,
        };

        pool.write_fixture(&config.fixture_path)?;
        pool.log_summary();
        Ok(pool)
    }
}
