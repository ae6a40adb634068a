//! Weighted task selection.
//!
//! Each virtual-user turn runs exactly one task. Tasks are drawn with
//! probability `weight / sum(weights)` using cumulative integer weights, so a
//! task with weight 0 stays registered but can never be drawn.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::TaskWeightsConfig;
use crate::error::{LoadTestError, Result};
use crate::payloads::ApiMethod;

/// Every endpoint the load generator exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Reports,
    ListCombos,
    Events,
    AskAi,
    ReportSummary,
    LogsInfo,
    LogsFilterOptions,
    LogsSearch,
    LogsHistogram,
    LogsHeatmap,
    LogsSeverityCount,
}

impl TaskKind {
    pub const ALL: [TaskKind; 11] = [
        TaskKind::Reports,
        TaskKind::ListCombos,
        TaskKind::Events,
        TaskKind::AskAi,
        TaskKind::ReportSummary,
        TaskKind::LogsInfo,
        TaskKind::LogsFilterOptions,
        TaskKind::LogsSearch,
        TaskKind::LogsHistogram,
        TaskKind::LogsHeatmap,
        TaskKind::LogsSeverityCount,
    ];

    /// Weight key used in configuration
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Reports => "reports",
            TaskKind::ListCombos => "list-combos",
            TaskKind::Events => "events",
            TaskKind::AskAi => "ask-ai",
            TaskKind::ReportSummary => "report-summary",
            TaskKind::LogsInfo => "logs-info",
            TaskKind::LogsFilterOptions => "logs-filter-options",
            TaskKind::LogsSearch => "logs-search",
            TaskKind::LogsHistogram => "logs-histogram",
            TaskKind::LogsHeatmap => "logs-heatmap",
            TaskKind::LogsSeverityCount => "logs-severity-count",
        }
    }

    /// Path relative to the target host, without a leading slash
    pub fn endpoint(&self) -> &'static str {
        match self {
            TaskKind::Reports => "api/v1/insights/reports",
            TaskKind::ListCombos => "api/v1/insights/list-combos",
            TaskKind::Events => "api/v1/insights/events",
            TaskKind::AskAi => "api/v1/insights/ai/ask-ai/",
            TaskKind::ReportSummary => "api/v1/insights/ai/report_summary",
            TaskKind::LogsInfo => "api/v1/insights/logs/info",
            TaskKind::LogsFilterOptions => "api/v1/insights/logs/filter-options",
            TaskKind::LogsSearch => "api/v1/insights/logs/search",
            TaskKind::LogsHistogram => "api/v1/insights/logs/histogram/",
            TaskKind::LogsHeatmap => "api/v1/insights/logs/heatmap/",
            TaskKind::LogsSeverityCount => "api/v1/insights/logs/severity-count/",
        }
    }

    pub fn method(&self) -> ApiMethod {
        match self {
            TaskKind::Events
            | TaskKind::ReportSummary
            | TaskKind::LogsInfo
            | TaskKind::LogsFilterOptions => ApiMethod::Get,
            _ => ApiMethod::Post,
        }
    }

    /// Name requests are grouped under in run statistics
    pub fn stats_name(&self) -> &'static str {
        match self {
            TaskKind::Reports => "/api/v1/insights/reports",
            TaskKind::ListCombos => "/api/v1/insights/list-combos",
            TaskKind::Events => "/api/v1/insights/events",
            TaskKind::AskAi => "/api/v1/insights/ai/ask-ai/",
            TaskKind::ReportSummary => "/api/v1/insights/ai/report_summary",
            TaskKind::LogsInfo => "/api/v1/insights/logs/info",
            TaskKind::LogsFilterOptions => "/api/v1/insights/logs/filter-options",
            TaskKind::LogsSearch => "/api/v1/insights/logs/search/",
            TaskKind::LogsHistogram => "/api/v1/insights/logs/histogram/",
            TaskKind::LogsHeatmap => "/api/v1/insights/logs/heatmap/",
            TaskKind::LogsSeverityCount => "/api/v1/insights/logs/severity-count/",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskKind {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self> {
        TaskKind::ALL
            .iter()
            .copied()
            .find(|task| task.name() == s)
            .ok_or_else(|| LoadTestError::config(format!("unknown task '{}'", s)))
    }
}

/// A registered task and its weight. Immutable once the scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    pub task: TaskKind,
    pub weight: u32,
}

impl TaskDescriptor {
    pub fn name(&self) -> &'static str {
        self.task.name()
    }

    pub fn endpoint(&self) -> &'static str {
        self.task.endpoint()
    }

    pub fn method(&self) -> ApiMethod {
        self.task.method()
    }
}

#[derive(Debug, Clone)]
pub struct WeightedTaskScheduler {
    descriptors: Vec<TaskDescriptor>,
    /// Running sum of weights, parallel to `descriptors`
    cumulative: Vec<u64>,
    total: u64,
}

impl WeightedTaskScheduler {
    /// Build from a task name -> weight map.
    ///
    /// Every known task must be present and no unknown keys are allowed.
    pub fn new(weights: &BTreeMap<String, u32>) -> Result<Self> {
        for key in weights.keys() {
            TaskKind::from_str(key).map_err(|_| {
                LoadTestError::config(format!("unknown task weight key '{}'", key))
            })?;
        }

        let mut descriptors = Vec::with_capacity(TaskKind::ALL.len());
        let mut cumulative = Vec::with_capacity(TaskKind::ALL.len());
        let mut total = 0u64;

        for task in TaskKind::ALL {
            let weight = *weights.get(task.name()).ok_or_else(|| {
                LoadTestError::config(format!("missing weight for task '{}'", task.name()))
            })?;
            total += u64::from(weight);
            descriptors.push(TaskDescriptor { task, weight });
            cumulative.push(total);
        }

        if total == 0 {
            return Err(LoadTestError::config("all task weights are zero"));
        }

        Ok(Self {
            descriptors,
            cumulative,
            total,
        })
    }

    /// Build from the active profile of a weights configuration
    pub fn from_config(config: &TaskWeightsConfig) -> Result<Self> {
        let weights = config.active_weights()?;
        Self::new(weights).map_err(|e| match e {
            LoadTestError::Configuration(msg) => LoadTestError::config(format!(
                "weight profile '{}': {}",
                config.active_profile, msg
            )),
            other => other,
        })
    }

    pub fn select<R>(&self, rng: &mut R) -> TaskKind
    where
        R: Rng + ?Sized,
    {
        let roll = rng.gen_range(0..self.total);
        // First entry whose running sum exceeds the roll; zero-weight entries
        // repeat the previous sum and are skipped.
        let index = self.cumulative.partition_point(|&sum| sum <= roll);
        self.descriptors[index].task
    }

    pub fn descriptors(&self) -> &[TaskDescriptor] {
        &self.descriptors
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    /// Selection probability of `task`
    pub fn probability(&self, task: TaskKind) -> f64 {
        self.descriptors
            .iter()
            .find(|d| d.task == task)
            .map(|d| f64::from(d.weight) / self.total as f64)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn weights(active: &[(TaskKind, u32)]) -> BTreeMap<String, u32> {
        TaskKind::ALL
            .iter()
            .map(|task| {
                let weight = active
                    .iter()
                    .find(|(t, _)| t == task)
                    .map(|(_, w)| *w)
                    .unwrap_or(0);
                (task.name().to_string(), weight)
            })
            .collect()
    }

    #[test]
    fn test_task_names_round_trip() {
        for task in TaskKind::ALL {
            assert_eq!(task.name().parse::<TaskKind>().unwrap(), task);
        }
        assert!("logs-viewer".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let scheduler =
            WeightedTaskScheduler::new(&weights(&[(TaskKind::LogsSearch, 1)])).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..10_000 {
            assert_eq!(scheduler.select(&mut rng), TaskKind::LogsSearch);
        }
    }

    #[test]
    fn test_selection_converges_to_weights() {
        let scheduler = WeightedTaskScheduler::new(&weights(&[
            (TaskKind::Reports, 3),
            (TaskKind::ListCombos, 1),
        ]))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let draws = 40_000;

        let mut counts: HashMap<TaskKind, u32> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(scheduler.select(&mut rng)).or_default() += 1;
        }

        let reports = f64::from(counts[&TaskKind::Reports]) / f64::from(draws);
        assert!((reports - 0.75).abs() < 0.02, "reports share {}", reports);
        assert_eq!(counts.len(), 2);
        assert_eq!(scheduler.probability(TaskKind::Reports), 0.75);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut map = weights(&[(TaskKind::Events, 1)]);
        map.insert("logs-viewer".to_string(), 2);
        let err = WeightedTaskScheduler::new(&map).unwrap_err();
        assert!(err.to_string().contains("logs-viewer"));
    }

    #[test]
    fn test_absent_key_rejected() {
        let mut map = weights(&[(TaskKind::Events, 1)]);
        map.remove("ask-ai");
        let err = WeightedTaskScheduler::new(&map).unwrap_err();
        assert!(err.to_string().contains("ask-ai"));
    }

    #[test]
    fn test_all_zero_rejected() {
        assert!(WeightedTaskScheduler::new(&weights(&[])).is_err());
    }

    #[test]
    fn test_default_profiles_are_valid() {
        let mut config = TaskWeightsConfig::default();
        let development = WeightedTaskScheduler::from_config(&config).unwrap();
        assert_eq!(development.probability(TaskKind::Reports), 0.0);

        config.active_profile = "production".to_string();
        let production = WeightedTaskScheduler::from_config(&config).unwrap();
        assert!(production.probability(TaskKind::Reports) > 0.0);
        assert_eq!(production.descriptors().len(), TaskKind::ALL.len());
    }

    #[test]
    fn test_get_endpoints() {
        assert_eq!(TaskKind::Events.method(), ApiMethod::Get);
        assert_eq!(TaskKind::LogsFilterOptions.method(), ApiMethod::Get);
        assert_eq!(TaskKind::LogsSearch.method(), ApiMethod::Post);
        assert!(!TaskKind::AskAi.endpoint().starts_with('/'));
    }
}
