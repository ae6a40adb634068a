//! Virtual-user runner.
//!
//! Spawns one tokio task per user at the configured spawn rate. Each user
//! owns its [`UserSession`] and a seedable RNG and loops: pick a task,
//! generate a payload, dispatch it, then wait. The data pool, scheduler and
//! dispatcher are shared read-only.

use chrono::Utc;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LoadTestConfig;
use crate::data_pool::DataPool;
use crate::dispatcher::{ApiRequest, RequestDispatcher};
use crate::error::{LoadTestError, Result};
use crate::metrics::{RunConfiguration, RunMetrics, RunSummary};
use crate::payloads::ApiGenerator;
use crate::scheduler::WeightedTaskScheduler;
use crate::session::UserSession;

/// State shared by every virtual user
struct Shared {
    config: LoadTestConfig,
    pool: Arc<DataPool>,
    scheduler: WeightedTaskScheduler,
    dispatcher: Arc<dyn RequestDispatcher>,
    metrics: Arc<RunMetrics>,
}

pub struct LoadRunner {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl LoadRunner {
    /// Validate everything a run needs before any user starts
    pub fn new(
        config: LoadTestConfig,
        pool: Arc<DataPool>,
        dispatcher: Arc<dyn RequestDispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let scheduler = WeightedTaskScheduler::from_config(&config.task_weights)?;

        if config.general.fixed_session_id.is_none() && pool.session_ids.is_empty() {
            return Err(LoadTestError::config(
                "data pool has no session ids and no fixed session id is configured",
            ));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pool,
                scheduler,
                dispatcher,
                metrics: Arc::new(RunMetrics::new()),
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> Arc<RunMetrics> {
        self.shared.metrics.clone()
    }

    /// Run until the configured run time elapses or the token is cancelled,
    /// then summarize and, if enabled, write the summary file.
    pub async fn run(&self) -> Result<RunSummary> {
        let config = &self.shared.config;
        let started_at = Utc::now();

        info!("{}", "=".repeat(60));
        info!("🚀 PANACEA API LOAD TEST STARTING");
        info!("{}", "=".repeat(60));
        info!(
            host = %config.general.host,
            users = config.load.users,
            spawn_rate = config.load.spawn_rate,
            run_time_seconds = config.load.run_time_seconds,
            profile = %config.task_weights.active_profile,
            "Target Host: {}",
            config.general.host
        );

        let deadline = {
            let cancel = self.cancel.clone();
            let run_time = Duration::from_secs(config.load.run_time_seconds);
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(run_time) => {
                        info!("⏰ Run time elapsed, stopping users");
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let spawn_interval = Duration::from_secs_f64(1.0 / config.load.spawn_rate);
        let mut handles = Vec::with_capacity(config.load.users as usize);

        for index in 0..u64::from(config.load.users) {
            if self.cancel.is_cancelled() {
                break;
            }
            let shared = self.shared.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(run_user(shared, index, cancel)));

            if index + 1 < u64::from(config.load.users) {
                tokio::select! {
                    _ = sleep(spawn_interval) => {}
                    _ = self.cancel.cancelled() => break,
                }
            }
        }
        info!("👥 All {} users have been spawned", handles.len());

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Virtual user task panicked");
            }
        }
        deadline.abort();

        let configuration = RunConfiguration {
            host: config.general.host.clone(),
            user_count: config.load.users,
            spawn_rate: config.load.spawn_rate,
            run_time_seconds: config.load.run_time_seconds,
            weight_profile: config.task_weights.active_profile.clone(),
            data_source: config.data_source.mode,
            seed: config.general.seed,
        };
        let summary = self
            .shared
            .metrics
            .summarize(configuration, started_at, Utc::now())
            .await;
        summary.log();

        if config.reporting.enabled {
            summary.write_to_dir(&config.reporting.results_dir)?;
        }

        Ok(summary)
    }
}

fn user_rng(seed: Option<u64>, index: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
        None => StdRng::from_entropy(),
    }
}

async fn run_user(shared: Arc<Shared>, index: u64, cancel: CancellationToken) {
    let config = &shared.config;
    let mut rng = user_rng(config.general.seed, index);

    let session = match UserSession::start(
        index,
        &shared.pool,
        config.general.fixed_session_id.as_deref(),
        &config.ranges,
        &mut rng,
    ) {
        Ok(session) => session,
        Err(e) => {
            error!(user = index, error = %e, "Virtual user could not start");
            return;
        }
    };
    shared.metrics.record_user(&session).await;
    info!(
        user = index,
        bundle_range = %session.bundle_range,
        combo_range = %session.combo_range,
        "User started with session {}",
        session.session_id
    );

    while !cancel.is_cancelled() {
        run_turn(&shared, &session, &mut rng).await;

        let wait = Duration::from_secs_f64(
            rng.gen_range(config.general.wait_min_seconds..=config.general.wait_max_seconds),
        );
        tokio::select! {
            _ = sleep(wait) => {}
            _ = cancel.cancelled() => break,
        }
    }
    debug!(user = index, "User stopped");
}

/// One turn: select, generate, dispatch, record. Generation failures only
/// end this turn.
async fn run_turn(shared: &Shared, session: &UserSession, rng: &mut StdRng) {
    let config = &shared.config;
    let task = shared.scheduler.select(rng);

    let generated = ApiGenerator::new(task, &shared.pool, session, &config.pagination, rng)
        .and_then(|generator| generator.generate(None, &shared.pool, rng));
    let generated = match generated {
        Ok(generated) => generated,
        Err(e) => {
            warn!(user = session.user_index, task = %task, error = %e, "Payload generation failed");
            shared.metrics.record_generation_failure(task.name()).await;
            return;
        }
    };

    debug!(
        user = session.user_index,
        task = %task,
        variant = generated.variant,
        "Dispatching request"
    );

    let request = ApiRequest {
        method: task.method(),
        path: task.endpoint().to_string(),
        payload: generated.payload,
        name: Some(task.stats_name().to_string()),
        session_id: session.session_id.clone(),
        log_curl: rng.gen_bool(config.general.curl_log_probability),
    };
    let outcome = shared.dispatcher.dispatch(request).await;
    shared.metrics.record_request(&outcome).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::RequestOutcome;
    use crate::scheduler::TaskKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        count: AtomicU64,
        sessions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RequestDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: ApiRequest) -> RequestOutcome {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.sessions.lock().unwrap().push(request.session_id.clone());
            RequestOutcome {
                name: request.stats_name().to_string(),
                method: request.method,
                status: Some(200),
                success: true,
                elapsed: Duration::from_millis(1),
                error: None,
            }
        }
    }

    fn pool() -> DataPool {
        DataPool {
            bundle_ids: vec![1, 2, 3],
            combo_ids: vec![1],
            session_ids: vec!["pooled".to_string()],
            case_owner_emails: vec!["a@example.com".to_string()],
            sfdc_case_numbers: vec!["1".to_string()],
            messages: vec!["hello".to_string()],
            log_level_types: vec!["info".to_string()],
            ..Default::default()
        }
    }

    fn config() -> LoadTestConfig {
        let mut config = LoadTestConfig::default();
        config.load.users = 3;
        config.load.spawn_rate = 100.0;
        config.load.run_time_seconds = 1;
        config.general.wait_min_seconds = 0.0;
        config.general.wait_max_seconds = 0.01;
        config.general.seed = Some(99);
        config.reporting.enabled = false;
        config
    }

    fn only(task: TaskKind, config: &mut LoadTestConfig) {
        let weights = config
            .task_weights
            .profiles
            .get_mut("development")
            .unwrap();
        for (name, weight) in weights.iter_mut() {
            *weight = u32::from(name == task.name());
        }
    }

    #[tokio::test]
    async fn test_run_dispatches_and_summarizes() {
        let mut config = config();
        only(TaskKind::Events, &mut config);
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let runner = LoadRunner::new(config, Arc::new(pool()), dispatcher.clone()).unwrap();
        let summary = runner.run().await.unwrap();

        assert_eq!(summary.total_users_registered, 3);
        assert!(dispatcher.count.load(Ordering::SeqCst) > 0);
        assert_eq!(summary.total_requests, dispatcher.count.load(Ordering::SeqCst));
        assert_eq!(summary.endpoints[0].name, "/api/v1/insights/events");
        assert!(dispatcher.sessions.lock().unwrap().iter().all(|s| s == "pooled"));
    }

    #[tokio::test]
    async fn test_generation_failures_do_not_stop_users() {
        let mut config = config();
        only(TaskKind::LogsSearch, &mut config);
        let dispatcher = Arc::new(RecordingDispatcher::default());

        // no bundle metadata, so every log viewer turn fails
        let runner = LoadRunner::new(config, Arc::new(pool()), dispatcher.clone()).unwrap();
        let summary = runner.run().await.unwrap();

        assert_eq!(dispatcher.count.load(Ordering::SeqCst), 0);
        assert!(summary.generation_failures["logs-search"] >= 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_run_early() {
        let mut config = config();
        config.load.run_time_seconds = 3_600;
        let runner =
            LoadRunner::new(config, Arc::new(pool()), Arc::new(RecordingDispatcher::default()))
                .unwrap();

        let token = runner.cancellation_token();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            token.cancel();
        });

        let summary = tokio::time::timeout(Duration::from_secs(10), runner.run())
            .await
            .unwrap()
            .unwrap();
        assert!(summary.test_duration_seconds < 10.0);
    }

    #[test]
    fn test_missing_sessions_rejected() {
        let mut pool = pool();
        pool.session_ids.clear();
        let result = LoadRunner::new(
            config(),
            Arc::new(pool),
            Arc::new(RecordingDispatcher::default()),
        );
        assert!(matches!(result, Err(LoadTestError::Configuration(_))));
    }

    #[test]
    fn test_seeded_user_rngs_are_reproducible() {
        let mut first = user_rng(Some(5), 2);
        let mut second = user_rng(Some(5), 2);
        let mut other = user_rng(Some(5), 3);

        let a: Vec<u32> = (0..5).map(|_| first.gen()).collect();
        let b: Vec<u32> = (0..5).map(|_| second.gen()).collect();
        let c: Vec<u32> = (0..5).map(|_| other.gen()).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
