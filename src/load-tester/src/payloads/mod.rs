//! Payload generation for every exercised endpoint.
//!
//! Each endpoint family implements [`PayloadGenerator`] with a closed enum
//! of named variants. [`ApiGenerator`] dispatches over all of them so the
//! runner can work with a [`TaskKind`] alone.

pub mod list;
pub mod log_viewer;
pub mod rca;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::PaginationConfig;
use crate::data_pool::{self, DataPool};
use crate::error::{LoadTestError, Result};
use crate::scheduler::TaskKind;
use crate::session::UserSession;

pub use list::{ListGenerator, ListVariant};
pub use log_viewer::{
    FilterOptionsGenerator, FilterOptionsVariant, HeatmapGenerator, HistogramGenerator,
    LogViewerVariant, LogsInfoGenerator, SearchGenerator, SeverityCountGenerator,
};
pub use rca::{
    AiSummaryGenerator, AiSummaryVariant, AskAiGenerator, AskAiVariant, EventsGenerator,
    EventsVariant,
};

/// JSON object sent as a POST body or flattened into GET query parameters
pub type Payload = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiMethod {
    Get,
    Post,
}

impl ApiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Closed set of named payload shapes for one endpoint
pub trait PayloadVariant: Copy + fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.name() == name)
    }
}

/// One endpoint family.
///
/// Identifiers that must stay stable across the variants of one call are
/// drawn when the generator is constructed.
pub trait PayloadGenerator {
    type Variant: PayloadVariant;

    fn task(&self) -> TaskKind;

    fn method(&self) -> ApiMethod {
        self.task().method()
    }

    fn endpoint(&self) -> &'static str {
        self.task().endpoint()
    }

    fn variants(&self) -> &'static [Self::Variant] {
        Self::Variant::ALL
    }

    fn payload_for<R>(&self, variant: Self::Variant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized;

    /// Generate a payload; `None` picks a variant uniformly for this call.
    fn generate<R>(
        &self,
        variant: Option<Self::Variant>,
        pool: &DataPool,
        rng: &mut R,
    ) -> Result<(Self::Variant, Payload)>
    where
        R: Rng + ?Sized,
    {
        let variant = match variant {
            Some(variant) => variant,
            None => *data_pool::choose(self.variants(), "payload variants", rng)?,
        };
        let payload = self.payload_for(variant, pool, rng)?;
        Ok((variant, payload))
    }
}

/// Result of one generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedPayload {
    pub task: TaskKind,
    pub variant: &'static str,
    pub payload: Payload,
}

/// Generator for any task, built fresh for every user turn
#[derive(Debug, Clone)]
pub enum ApiGenerator {
    Reports(ListGenerator),
    ListCombos(ListGenerator),
    Events(EventsGenerator),
    AskAi(AskAiGenerator),
    ReportSummary(AiSummaryGenerator),
    LogsInfo(LogsInfoGenerator),
    LogsFilterOptions(FilterOptionsGenerator),
    LogsSearch(SearchGenerator),
    LogsHistogram(HistogramGenerator),
    LogsHeatmap(HeatmapGenerator),
    LogsSeverityCount(SeverityCountGenerator),
}

impl ApiGenerator {
    pub fn new<R>(
        task: TaskKind,
        pool: &DataPool,
        session: &UserSession,
        pagination: &PaginationConfig,
        rng: &mut R,
    ) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        let generator = match task {
            TaskKind::Reports => {
                ApiGenerator::Reports(ListGenerator::reports(pagination.list_page_size))
            }
            TaskKind::ListCombos => {
                ApiGenerator::ListCombos(ListGenerator::list_combos(pagination.list_page_size))
            }
            TaskKind::Events => ApiGenerator::Events(EventsGenerator::new(pool, session, rng)?),
            TaskKind::AskAi => ApiGenerator::AskAi(AskAiGenerator),
            TaskKind::ReportSummary => {
                ApiGenerator::ReportSummary(AiSummaryGenerator::new(pool, session, rng)?)
            }
            TaskKind::LogsInfo => {
                ApiGenerator::LogsInfo(LogsInfoGenerator::new(pool, session, rng)?)
            }
            TaskKind::LogsFilterOptions => {
                ApiGenerator::LogsFilterOptions(FilterOptionsGenerator::new(pool, rng)?)
            }
            TaskKind::LogsSearch => ApiGenerator::LogsSearch(SearchGenerator::new(
                pool,
                session,
                pagination.search_page_size,
                rng,
            )?),
            TaskKind::LogsHistogram => ApiGenerator::LogsHistogram(HistogramGenerator::new(
                pool,
                session,
                pagination.histogram_page_size,
                rng,
            )?),
            TaskKind::LogsHeatmap => {
                ApiGenerator::LogsHeatmap(HeatmapGenerator::new(pool, session, rng)?)
            }
            TaskKind::LogsSeverityCount => {
                ApiGenerator::LogsSeverityCount(SeverityCountGenerator::new(pool, session, rng)?)
            }
        };
        Ok(generator)
    }

    pub fn task(&self) -> TaskKind {
        match self {
            ApiGenerator::Reports(g) | ApiGenerator::ListCombos(g) => g.task(),
            ApiGenerator::Events(g) => g.task(),
            ApiGenerator::AskAi(g) => g.task(),
            ApiGenerator::ReportSummary(g) => g.task(),
            ApiGenerator::LogsInfo(g) => g.task(),
            ApiGenerator::LogsFilterOptions(g) => g.task(),
            ApiGenerator::LogsSearch(g) => g.task(),
            ApiGenerator::LogsHistogram(g) => g.task(),
            ApiGenerator::LogsHeatmap(g) => g.task(),
            ApiGenerator::LogsSeverityCount(g) => g.task(),
        }
    }

    pub fn method(&self) -> ApiMethod {
        self.task().method()
    }

    pub fn endpoint(&self) -> &'static str {
        self.task().endpoint()
    }

    /// Generate a payload for the named variant, or a uniformly chosen one.
    ///
    /// An unknown variant name is a configuration error.
    pub fn generate<R>(
        &self,
        variant: Option<&str>,
        pool: &DataPool,
        rng: &mut R,
    ) -> Result<GeneratedPayload>
    where
        R: Rng + ?Sized,
    {
        match self {
            ApiGenerator::Reports(g) | ApiGenerator::ListCombos(g) => {
                generate_named(g, variant, pool, rng)
            }
            ApiGenerator::Events(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::AskAi(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::ReportSummary(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::LogsInfo(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::LogsFilterOptions(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::LogsSearch(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::LogsHistogram(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::LogsHeatmap(g) => generate_named(g, variant, pool, rng),
            ApiGenerator::LogsSeverityCount(g) => generate_named(g, variant, pool, rng),
        }
    }
}

/// Variant names available for `task`
pub fn variant_names(task: TaskKind) -> Vec<&'static str> {
    fn names<V: PayloadVariant>() -> Vec<&'static str> {
        V::ALL.iter().map(|v| v.name()).collect()
    }

    match task {
        TaskKind::Reports | TaskKind::ListCombos => names::<ListVariant>(),
        TaskKind::Events => names::<EventsVariant>(),
        TaskKind::AskAi => names::<AskAiVariant>(),
        TaskKind::ReportSummary => names::<AiSummaryVariant>(),
        TaskKind::LogsFilterOptions => names::<FilterOptionsVariant>(),
        TaskKind::LogsInfo
        | TaskKind::LogsSearch
        | TaskKind::LogsHistogram
        | TaskKind::LogsHeatmap
        | TaskKind::LogsSeverityCount => names::<LogViewerVariant>(),
    }
}

fn generate_named<G, R>(
    generator: &G,
    variant: Option<&str>,
    pool: &DataPool,
    rng: &mut R,
) -> Result<GeneratedPayload>
where
    G: PayloadGenerator,
    R: Rng + ?Sized,
{
    let variant = match variant {
        Some(name) => Some(G::Variant::from_name(name).ok_or_else(|| {
            LoadTestError::config(format!(
                "unknown variant '{}' for task '{}'",
                name,
                generator.task()
            ))
        })?),
        None => None,
    };

    let (variant, payload) = generator.generate(variant, pool, rng)?;
    Ok(GeneratedPayload {
        task: generator.task(),
        variant: variant.name(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdRangeConfig;
    use crate::data_pool::BundleMeta;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool() -> DataPool {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let mut pool = DataPool {
            bundle_ids: vec![101, 102, 103],
            combo_ids: vec![7, 8],
            session_ids: vec!["session-a".to_string()],
            case_owner_emails: vec!["owner@example.com".to_string()],
            sfdc_case_numbers: vec!["00123456".to_string()],
            messages: vec!["disk full".to_string()],
            log_level_types: vec!["info".to_string(), "error".to_string()],
            ..Default::default()
        };
        pool.bundle_data.insert(
            101,
            BundleMeta {
                components: vec!["stargate".to_string()],
                source_log_filenames: vec!["stargate.out".to_string()],
                start_time: start,
                end_time: start + chrono::Duration::hours(6),
            },
        );
        pool
    }

    #[test]
    fn test_every_task_generates() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(3);
        let session =
            UserSession::start(0, &pool, None, &IdRangeConfig::default(), &mut rng).unwrap();

        for task in TaskKind::ALL {
            let generator =
                ApiGenerator::new(task, &pool, &session, &PaginationConfig::default(), &mut rng)
                    .unwrap();
            assert_eq!(generator.task(), task);

            for _ in 0..20 {
                let generated = generator.generate(None, &pool, &mut rng).unwrap();
                assert!(generated.payload.is_object(), "{} payload", task);
                assert!(variant_names(task).contains(&generated.variant));
            }
        }
    }

    #[test]
    fn test_named_variant_is_honored() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(5);
        let session =
            UserSession::start(0, &pool, None, &IdRangeConfig::default(), &mut rng).unwrap();
        let generator = ApiGenerator::new(
            TaskKind::Reports,
            &pool,
            &session,
            &PaginationConfig::default(),
            &mut rng,
        )
        .unwrap();

        let generated = generator.generate(Some("page_2"), &pool, &mut rng).unwrap();
        assert_eq!(generated.variant, "page_2");
        assert_eq!(generated.payload["page_no"], 2);
    }

    #[test]
    fn test_unknown_variant_is_configuration_error() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(5);
        let session =
            UserSession::start(0, &pool, None, &IdRangeConfig::default(), &mut rng).unwrap();
        let generator = ApiGenerator::new(
            TaskKind::Events,
            &pool,
            &session,
            &PaginationConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert!(matches!(
            generator.generate(Some("page_2"), &pool, &mut rng),
            Err(LoadTestError::Configuration(_))
        ));
    }

    #[test]
    fn test_log_viewer_without_metadata_fails_turn() {
        let mut pool = pool();
        pool.bundle_data.clear();
        let mut rng = StdRng::seed_from_u64(5);
        let session =
            UserSession::start(0, &pool, None, &IdRangeConfig::default(), &mut rng).unwrap();

        let err = ApiGenerator::new(
            TaskKind::LogsSearch,
            &pool,
            &session,
            &PaginationConfig::default(),
            &mut rng,
        )
        .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_method_display() {
        assert_eq!(ApiMethod::Get.to_string(), "GET");
        assert_eq!(serde_json::to_string(&ApiMethod::Post).unwrap(), "\"POST\"");
    }
}
