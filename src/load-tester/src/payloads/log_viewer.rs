//! Log viewer endpoints.
//!
//! Search, histogram, heatmap and severity-count share one set of filter
//! field generators in [`fields`]; each endpoint composes the fields it
//! accepts. Every instance is pinned to one bundle that has metadata.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use super::{Payload, PayloadGenerator, PayloadVariant};
use crate::data_pool::{BundleId, BundleMeta, DataPool};
use crate::error::{LoadTestError, Result};
use crate::scheduler::TaskKind;
use crate::session::UserSession;

/// Upper bound of bundle ids sent to filter-options in one request
pub const MAX_FILTER_OPTION_BUNDLES: usize = 3;

/// Shared filter field generators
pub mod fields {
    use chrono::{Duration, NaiveDateTime};
    use rand::seq::SliceRandom;
    use rand::Rng;
    use serde_json::Value;

    use crate::data_pool::{self, DataPool};
    use crate::error::Result;

    /// Layout of timestamps sent to the API
    pub const API_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    const MAX_FALLBACK_WINDOW_HOURS: i64 = 240;
    const MAX_WINDOW_HOURS: i64 = 24;

    /// One time in five pick 1-3 entries (fewer if unavailable), else none.
    pub fn optional_sample<R>(items: &[String], rng: &mut R) -> Vec<String>
    where
        R: Rng + ?Sized,
    {
        if !rng.gen_ratio(1, 5) {
            return Vec::new();
        }
        let count = rng.gen_range(1..=3).min(items.len());
        items.choose_multiple(rng, count).cloned().collect()
    }

    /// Random window inside a bundle's time span.
    ///
    /// Inverted or empty spans are repaired by opening a window of up to
    /// ten days from the start. The result always has `start <= end`.
    pub fn time_window<R>(
        start: NaiveDateTime,
        end: NaiveDateTime,
        rng: &mut R,
    ) -> (NaiveDateTime, NaiveDateTime)
    where
        R: Rng + ?Sized,
    {
        if start >= end {
            let hours = rng.gen_range(0..=MAX_FALLBACK_WINDOW_HOURS);
            return (start, start + Duration::hours(hours));
        }

        let total_seconds = (end - start).num_seconds();
        let window_start = start + Duration::seconds(rng.gen_range(0..=total_seconds));
        let hours = rng.gen_range(0..=MAX_WINDOW_HOURS);
        (window_start, window_start + Duration::hours(hours))
    }

    pub fn format_time(time: NaiveDateTime) -> String {
        time.format(API_TIME_FORMAT).to_string()
    }

    /// Six times in seven an empty string, otherwise a pool message
    pub fn search_log_string<R>(pool: &DataPool, rng: &mut R) -> Result<String>
    where
        R: Rng + ?Sized,
    {
        if rng.gen_ratio(1, 7) {
            Ok(data_pool::choose(&pool.messages, "messages", rng)?.clone())
        } else {
            Ok(String::new())
        }
    }

    /// `true` one time in five, otherwise null
    pub fn is_curated<R>(rng: &mut R) -> Value
    where
        R: Rng + ?Sized,
    {
        if rng.gen_ratio(1, 5) {
            Value::Bool(true)
        } else {
            Value::Null
        }
    }

    /// CVM IP filtering is never exercised.
    pub fn cvm_ips() -> Value {
        Value::Array(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogViewerVariant {
    Default,
}

impl PayloadVariant for LogViewerVariant {
    const ALL: &'static [Self] = &[LogViewerVariant::Default];

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Bundle a log viewer generator is pinned to
#[derive(Debug, Clone)]
pub struct LogViewerTarget {
    pub bundle_id: BundleId,
    pub meta: BundleMeta,
}

impl LogViewerTarget {
    pub fn pick<R>(pool: &DataPool, session: &UserSession, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        let candidates = pool.log_viewer_bundle_ids();
        let bundle_id = session.pick_bundle(&candidates, rng)?;
        let meta = pool.bundle_meta(bundle_id).cloned().ok_or_else(|| {
            LoadTestError::invariant(format!("bundle {} has no log metadata", bundle_id))
        })?;
        Ok(Self { bundle_id, meta })
    }

    fn window<R: Rng + ?Sized>(&self, rng: &mut R) -> (String, String) {
        let (start, end) = fields::time_window(self.meta.start_time, self.meta.end_time, rng);
        (fields::format_time(start), fields::format_time(end))
    }

    /// Filters accepted by the paged endpoints
    fn paged_filters<R>(&self, pool: &DataPool, include_log_levels: bool, rng: &mut R) -> Result<Value>
    where
        R: Rng + ?Sized,
    {
        let (start_time, end_time) = self.window(rng);
        let mut filters = json!({
            "source_log_filenames": fields::optional_sample(&self.meta.source_log_filenames, rng),
            "components": fields::optional_sample(&self.meta.components, rng),
            "cvm_ips": fields::cvm_ips(),
            "start_time": start_time,
            "end_time": end_time,
            "search_log_string": fields::search_log_string(pool, rng)?,
            "is_curated": fields::is_curated(rng),
        });
        if include_log_levels {
            filters["log_levels"] = json!(fields::optional_sample(&pool.log_level_types, rng));
        }
        Ok(filters)
    }

    /// Filters accepted by the aggregate endpoints
    fn aggregate_filters<R>(&self, pool: &DataPool, rng: &mut R) -> Value
    where
        R: Rng + ?Sized,
    {
        let (start_time, end_time) = self.window(rng);
        json!({
            "components": fields::optional_sample(&self.meta.components, rng),
            "log_levels": fields::optional_sample(&pool.log_level_types, rng),
            "cvm_ips": fields::cvm_ips(),
            "start_time": start_time,
            "end_time": end_time,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogsInfoGenerator {
    pub target: LogViewerTarget,
}

impl LogsInfoGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            target: LogViewerTarget::pick(pool, session, rng)?,
        })
    }
}

impl PayloadGenerator for LogsInfoGenerator {
    type Variant = LogViewerVariant;

    fn task(&self) -> TaskKind {
        TaskKind::LogsInfo
    }

    fn payload_for<R>(&self, _variant: LogViewerVariant, _pool: &DataPool, _rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        Ok(json!({ "bundle_id": self.target.bundle_id }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOptionsVariant {
    BundleIdsOnly,
}

impl PayloadVariant for FilterOptionsVariant {
    const ALL: &'static [Self] = &[FilterOptionsVariant::BundleIdsOnly];

    fn name(&self) -> &'static str {
        "bundle_ids_only"
    }
}

#[derive(Debug, Clone)]
pub struct FilterOptionsGenerator {
    pub bundle_ids: Vec<BundleId>,
}

impl FilterOptionsGenerator {
    /// Draw 1-3 distinct bundle ids from the pool
    pub fn new<R>(pool: &DataPool, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        if pool.bundle_ids.is_empty() {
            return Err(LoadTestError::invariant("data pool has no bundle ids"));
        }
        let count = rng
            .gen_range(1..=MAX_FILTER_OPTION_BUNDLES)
            .min(pool.bundle_ids.len());
        let bundle_ids = pool
            .bundle_ids
            .choose_multiple(rng, count)
            .copied()
            .collect();
        Ok(Self { bundle_ids })
    }
}

impl PayloadGenerator for FilterOptionsGenerator {
    type Variant = FilterOptionsVariant;

    fn task(&self) -> TaskKind {
        TaskKind::LogsFilterOptions
    }

    fn payload_for<R>(&self, _variant: FilterOptionsVariant, _pool: &DataPool, _rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        let joined = self
            .bundle_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Ok(json!({ "bundle_ids": joined }))
    }
}

#[derive(Debug, Clone)]
pub struct SearchGenerator {
    pub target: LogViewerTarget,
    page_size: u32,
}

impl SearchGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, page_size: u32, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            target: LogViewerTarget::pick(pool, session, rng)?,
            page_size,
        })
    }
}

impl PayloadGenerator for SearchGenerator {
    type Variant = LogViewerVariant;

    fn task(&self) -> TaskKind {
        TaskKind::LogsSearch
    }

    fn payload_for<R>(&self, _variant: LogViewerVariant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        Ok(json!({
            "bundle_ids": [self.target.bundle_id],
            "page_no": 1,
            "page_size": self.page_size,
            "filters": self.target.paged_filters(pool, true, rng)?,
        }))
    }
}

/// Log levels are filtered client-side for the histogram, so they are never sent.
#[derive(Debug, Clone)]
pub struct HistogramGenerator {
    pub target: LogViewerTarget,
    page_size: u32,
}

impl HistogramGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, page_size: u32, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            target: LogViewerTarget::pick(pool, session, rng)?,
            page_size,
        })
    }
}

impl PayloadGenerator for HistogramGenerator {
    type Variant = LogViewerVariant;

    fn task(&self) -> TaskKind {
        TaskKind::LogsHistogram
    }

    fn payload_for<R>(&self, _variant: LogViewerVariant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        Ok(json!({
            "bundle_ids": [self.target.bundle_id],
            "page_no": 1,
            "page_size": self.page_size,
            "filters": self.target.paged_filters(pool, false, rng)?,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct HeatmapGenerator {
    pub target: LogViewerTarget,
}

impl HeatmapGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            target: LogViewerTarget::pick(pool, session, rng)?,
        })
    }
}

impl PayloadGenerator for HeatmapGenerator {
    type Variant = LogViewerVariant;

    fn task(&self) -> TaskKind {
        TaskKind::LogsHeatmap
    }

    fn payload_for<R>(&self, _variant: LogViewerVariant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        Ok(json!({
            "bundle_ids": [self.target.bundle_id],
            "filters": self.target.aggregate_filters(pool, rng),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct SeverityCountGenerator {
    pub target: LogViewerTarget,
}

impl SeverityCountGenerator {
    pub fn new<R>(pool: &DataPool, session: &UserSession, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        Ok(Self {
            target: LogViewerTarget::pick(pool, session, rng)?,
        })
    }
}

impl PayloadGenerator for SeverityCountGenerator {
    type Variant = LogViewerVariant;

    fn task(&self) -> TaskKind {
        TaskKind::LogsSeverityCount
    }

    fn payload_for<R>(&self, _variant: LogViewerVariant, pool: &DataPool, rng: &mut R) -> Result<Payload>
    where
        R: Rng + ?Sized,
    {
        Ok(json!({
            "bundle_ids": [self.target.bundle_id],
            "filters": self.target.aggregate_filters(pool, rng),
        }))
    }
}
