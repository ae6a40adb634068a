//! Run statistics and the end-of-run summary file.

use chrono::{DateTime, Utc};
use hdrhistogram::{CreationError, Histogram};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DataSourceMode;
use crate::dispatcher::RequestOutcome;
use crate::error::{LoadTestError, Result};
use crate::payloads::ApiMethod;
use crate::session::{IdRange, UserSession};

/// Users whose ranges are listed in the summary
pub const SUMMARY_USER_RANGES: usize = 10;

/// Aggregated statistics for one request group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub name: String,
    pub method: ApiMethod,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub error_rate_percent: f64,
    pub status_codes: BTreeMap<u16, u64>,
}

/// Significant digits kept by the latency histograms
const LATENCY_SIGFIG: u8 = 3;

/// Latencies live in a fixed-size histogram (microseconds), so memory stays
/// flat however long the run.
#[derive(Debug)]
struct EndpointAccumulator {
    method: ApiMethod,
    latencies_us: Histogram<u64>,
    successes: u64,
    failures: u64,
    status_codes: BTreeMap<u16, u64>,
}

impl EndpointAccumulator {
    fn new(method: ApiMethod) -> std::result::Result<Self, CreationError> {
        Ok(Self {
            method,
            latencies_us: Histogram::new(LATENCY_SIGFIG)?,
            successes: 0,
            failures: 0,
            status_codes: BTreeMap::new(),
        })
    }

    fn record_latency(&mut self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latencies_us.saturating_record(micros);
    }

    fn stats(&self, name: &str) -> EndpointStats {
        let total = self.successes + self.failures;
        let latencies = &self.latencies_us;
        let to_ms = |micros: u64| micros as f64 / 1000.0;

        EndpointStats {
            name: name.to_string(),
            method: self.method,
            total_requests: total,
            successful_requests: self.successes,
            failed_requests: self.failures,
            average_response_time_ms: if latencies.is_empty() {
                0.0
            } else {
                latencies.mean() / 1000.0
            },
            p95_response_time_ms: to_ms(latencies.value_at_quantile(0.95)),
            p99_response_time_ms: to_ms(latencies.value_at_quantile(0.99)),
            max_response_time_ms: to_ms(latencies.max()),
            error_rate_percent: if total == 0 {
                0.0
            } else {
                self.failures as f64 / total as f64 * 100.0
            },
            status_codes: self.status_codes.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    endpoints: BTreeMap<String, EndpointAccumulator>,
    generation_failures: BTreeMap<String, u64>,
    user_ranges: Vec<UserRangeSummary>,
    users_started: u64,
}

/// Shared recorder for every virtual user's results
#[derive(Debug, Default)]
pub struct RunMetrics {
    state: Mutex<MetricsState>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, outcome: &RequestOutcome) {
        let elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0;
        if outcome.success {
            debug!("✅ {} {} - {:.0}ms", outcome.method, outcome.name, elapsed_ms);
        } else {
            warn!(
                "❌ {} {} - {:.0}ms - Error: {}",
                outcome.method,
                outcome.name,
                elapsed_ms,
                outcome.error.as_deref().unwrap_or("unknown")
            );
        }

        let mut state = self.state.lock().await;
        let entry = match state.endpoints.entry(outcome.name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => match EndpointAccumulator::new(outcome.method) {
                Ok(accumulator) => slot.insert(accumulator),
                Err(e) => {
                    error!(name = %outcome.name, error = %e, "Could not create latency histogram");
                    return;
                }
            },
        };
        entry.record_latency(outcome.elapsed);
        if outcome.success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
        if let Some(status) = outcome.status {
            *entry.status_codes.entry(status).or_default() += 1;
        }
    }

    pub async fn record_generation_failure(&self, task: &str) {
        let mut state = self.state.lock().await;
        *state.generation_failures.entry(task.to_string()).or_default() += 1;
    }

    /// Register a started user; the first few keep their ranges for the summary
    pub async fn record_user(&self, session: &UserSession) {
        let mut state = self.state.lock().await;
        state.users_started += 1;
        if state.user_ranges.len() < SUMMARY_USER_RANGES {
            state.user_ranges.push(UserRangeSummary {
                user_index: session.user_index,
                bundle_range: session.bundle_range,
                combo_range: session.combo_range,
            });
        }
    }

    pub async fn endpoint_stats(&self) -> Vec<EndpointStats> {
        let state = self.state.lock().await;
        state
            .endpoints
            .iter()
            .map(|(name, acc)| acc.stats(name))
            .collect()
    }

    pub async fn generation_failures(&self) -> BTreeMap<String, u64> {
        self.state.lock().await.generation_failures.clone()
    }

    pub async fn users_started(&self) -> u64 {
        self.state.lock().await.users_started
    }

    /// Freeze the collected statistics into a summary
    pub async fn summarize(
        &self,
        configuration: RunConfiguration,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> RunSummary {
        let endpoints = self.endpoint_stats().await;
        let state = self.state.lock().await;

        let duration_seconds = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        let total_requests: u64 = endpoints.iter().map(|e| e.total_requests).sum();
        let failed_requests: u64 = endpoints.iter().map(|e| e.failed_requests).sum();

        let mut user_ranges = state.user_ranges.clone();
        user_ranges.sort_by_key(|u| u.user_index);

        RunSummary {
            run_id: Uuid::new_v4(),
            start_time: started_at,
            end_time: finished_at,
            test_duration_seconds: duration_seconds,
            config: configuration,
            total_users_registered: state.users_started,
            user_ranges,
            total_requests,
            failed_requests,
            requests_per_second: if duration_seconds > 0.0 {
                total_requests as f64 / duration_seconds
            } else {
                0.0
            },
            generation_failures: state.generation_failures.clone(),
            endpoints,
        }
    }
}

/// Settings the run was started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub host: String,
    pub user_count: u32,
    pub spawn_rate: f64,
    pub run_time_seconds: u64,
    pub weight_profile: String,
    pub data_source: DataSourceMode,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRangeSummary {
    pub user_index: u64,
    pub bundle_range: IdRange,
    pub combo_range: IdRange,
}

/// End-of-run report written to the results directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub test_duration_seconds: f64,
    pub config: RunConfiguration,
    pub total_users_registered: u64,
    /// Ranges of the first users only
    pub user_ranges: Vec<UserRangeSummary>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub requests_per_second: f64,
    pub generation_failures: BTreeMap<String, u64>,
    pub endpoints: Vec<EndpointStats>,
}

impl RunSummary {
    /// File name used for a summary finished at `finished_at`
    pub fn file_name(finished_at: DateTime<Utc>) -> String {
        format!("test_summary_{}.json", finished_at.format("%Y%m%d_%H%M%S"))
    }

    /// Write the summary as pretty JSON into `dir` and return the file path
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::file_name(self.end_time));
        let write_error = |source| LoadTestError::SummaryWrite {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(write_error)?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| LoadTestError::invariant(format!("summary serialization failed: {}", e)))?;
        std::fs::write(&path, content).map_err(write_error)?;

        info!(path = %path.display(), "📊 Test summary saved");
        Ok(path)
    }

    pub fn log(&self) {
        info!("{}", "=".repeat(60));
        info!("🏁 PANACEA API LOAD TEST COMPLETED");
        info!("{}", "=".repeat(60));
        info!("Total Users Registered: {}", self.total_users_registered);
        info!("Test Duration: {:.2} seconds", self.test_duration_seconds);
        info!(
            "Requests: {} total, {} failed, {:.2} req/s",
            self.total_requests, self.failed_requests, self.requests_per_second
        );
        for endpoint in &self.endpoints {
            info!(
                name = %endpoint.name,
                method = %endpoint.method,
                total = endpoint.total_requests,
                failed = endpoint.failed_requests,
                avg_ms = %format!("{:.1}", endpoint.average_response_time_ms),
                p95_ms = %format!("{:.1}", endpoint.p95_response_time_ms),
                "Endpoint statistics"
            );
        }
        for (task, count) in &self.generation_failures {
            warn!(task = %task, count = count, "Payload generation failures");
        }
        info!("{}", "=".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn close(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() <= expected * 0.01
    }

    fn outcome(name: &str, success: bool, ms: u64, status: Option<u16>) -> RequestOutcome {
        RequestOutcome {
            name: name.to_string(),
            method: ApiMethod::Post,
            status,
            success,
            elapsed: Duration::from_millis(ms),
            error: (!success).then(|| "HTTP 500".to_string()),
        }
    }

    fn configuration() -> RunConfiguration {
        RunConfiguration {
            host: "http://localhost:9898".to_string(),
            user_count: 2,
            spawn_rate: 1.0,
            run_time_seconds: 10,
            weight_profile: "development".to_string(),
            data_source: DataSourceMode::Static,
            seed: Some(1),
        }
    }

    #[test]
    fn test_latency_quantiles_from_histogram() {
        let mut accumulator = EndpointAccumulator::new(ApiMethod::Get).unwrap();
        for ms in 1..=100 {
            accumulator.record_latency(Duration::from_millis(ms));
            accumulator.successes += 1;
        }

        let stats = accumulator.stats("/a");
        assert!(close(stats.p95_response_time_ms, 95.0), "p95 {}", stats.p95_response_time_ms);
        assert!(close(stats.p99_response_time_ms, 99.0), "p99 {}", stats.p99_response_time_ms);
        assert!(close(stats.max_response_time_ms, 100.0), "max {}", stats.max_response_time_ms);
        assert!(close(stats.average_response_time_ms, 50.5), "mean {}", stats.average_response_time_ms);
    }

    #[test]
    fn test_histogram_memory_is_flat() {
        let mut accumulator = EndpointAccumulator::new(ApiMethod::Post).unwrap();
        accumulator.record_latency(Duration::from_millis(5));
        let footprint = accumulator.latencies_us.distinct_values();

        for _ in 0..100_000 {
            accumulator.record_latency(Duration::from_millis(5));
        }
        assert_eq!(accumulator.latencies_us.distinct_values(), footprint);
        assert_eq!(accumulator.latencies_us.len(), 100_001);
    }

    #[test]
    fn test_empty_endpoint_stats_are_zero() {
        let stats = EndpointAccumulator::new(ApiMethod::Get).unwrap().stats("/a");
        assert_eq!(stats.average_response_time_ms, 0.0);
        assert_eq!(stats.p99_response_time_ms, 0.0);
        assert_eq!(stats.max_response_time_ms, 0.0);
    }

    #[tokio::test]
    async fn test_records_per_endpoint() {
        let metrics = RunMetrics::new();
        metrics.record_request(&outcome("/a", true, 10, Some(200))).await;
        metrics.record_request(&outcome("/a", false, 30, Some(500))).await;
        metrics.record_request(&outcome("/b", true, 5, Some(200))).await;
        metrics.record_generation_failure("logs-search").await;

        let stats = metrics.endpoint_stats().await;
        assert_eq!(stats.len(), 2);
        let a = &stats[0];
        assert_eq!(a.name, "/a");
        assert_eq!(a.total_requests, 2);
        assert_eq!(a.failed_requests, 1);
        assert_eq!(a.error_rate_percent, 50.0);
        assert!(close(a.average_response_time_ms, 20.0));
        assert_eq!(a.status_codes[&500], 1);
        assert_eq!(metrics.generation_failures().await["logs-search"], 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_request_logged_once() {
        let metrics = RunMetrics::new();
        metrics.record_request(&outcome("/a", false, 12, Some(503))).await;

        logs_assert(|lines: &[&str]| {
            let warnings = lines.iter().filter(|line| line.contains("❌")).count();
            if warnings == 1 {
                Ok(())
            } else {
                Err(format!("expected one failure line, found {}", warnings))
            }
        });
    }

    #[test]
    fn test_empty_run_summary() {
        let metrics = RunMetrics::new();
        let started = Utc::now();
        let summary = tokio_test::block_on(metrics.summarize(configuration(), started, started));

        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.requests_per_second, 0.0);
        assert!(summary.endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_summary_keeps_first_user_ranges() {
        let metrics = RunMetrics::new();
        for index in 0..15u64 {
            let session = UserSession {
                user_index: index,
                session_id: format!("s{}", index),
                bundle_range: IdRange { lo: index, hi: index + 1 },
                combo_range: IdRange { lo: 1, hi: 2 },
            };
            metrics.record_user(&session).await;
        }

        let started = Utc::now();
        let summary = metrics
            .summarize(configuration(), started, started + chrono::Duration::seconds(10))
            .await;
        assert_eq!(summary.total_users_registered, 15);
        assert_eq!(summary.user_ranges.len(), SUMMARY_USER_RANGES);
        assert_eq!(summary.test_duration_seconds, 10.0);
    }

    #[tokio::test]
    async fn test_summary_written_with_timestamped_name() {
        let dir = TempDir::new().unwrap();
        let metrics = RunMetrics::new();
        metrics.record_request(&outcome("/a", true, 10, Some(200))).await;

        let started = Utc::now();
        let summary = metrics
            .summarize(configuration(), started, started + chrono::Duration::seconds(4))
            .await;
        let path = summary.write_to_dir(&dir.path().join("results")).unwrap();

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("test_summary_"));
        assert!(file_name.ends_with(".json"));

        let loaded: RunSummary =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.total_requests, 1);
        assert_eq!(loaded.config, configuration());
        assert_eq!(loaded.requests_per_second, 0.25);
    }
}
