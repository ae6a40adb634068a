//! Panacea Load Generator Binary
//!
//! Builds the data pool, then drives the Panacea insights API with weighted
//! virtual users. Also previews payloads and lists the task table offline.

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use panacea_load_tester::config::{DataSourceMode, LoadTestConfig};
use panacea_load_tester::payloads::{self, ApiGenerator};
use panacea_load_tester::provider::DataPoolProvider;
use panacea_load_tester::runner::LoadRunner;
use panacea_load_tester::scheduler::{TaskKind, WeightedTaskScheduler};
use panacea_load_tester::session::UserSession;
use panacea_load_tester::HttpDispatcher;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let matches = build_cli().get_matches();
    init_tracing(&matches)?;

    info!("🚀 Panacea Load Generator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_configuration(&matches)?;

    match matches.subcommand() {
        Some(("run", sub_matches)) => handle_run(config, sub_matches).await,
        Some(("build-pool", _)) => handle_build_pool(config).await,
        Some(("preview", sub_matches)) => handle_preview(config, sub_matches).await,
        Some(("tasks", _)) => handle_tasks(config),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn build_cli() -> Command {
    let task_names: Vec<&'static str> = TaskKind::ALL.iter().map(|t| t.name()).collect();

    Command::new("panacea-load")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Panacea Platform Team")
        .about("Weighted virtual-user load generator for the Panacea insights API")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("YAML configuration file")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .env("PANACEA_LOG_LEVEL")
                .help("Default log filter when RUST_LOG is unset")
                .default_value("info")
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Build the data pool and run the load test")
                .arg(
                    Arg::new("live")
                        .long("live")
                        .action(ArgAction::SetTrue)
                        .help("Harvest the data pool from live sources"),
                )
                .arg(
                    Arg::new("users")
                        .short('u')
                        .long("users")
                        .value_name("NUM")
                        .help("Number of concurrent users")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("spawn-rate")
                        .short('r')
                        .long("spawn-rate")
                        .value_name("USERS_PER_SEC")
                        .help("Users started per second")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("run-time")
                        .short('t')
                        .long("run-time")
                        .value_name("SECONDS")
                        .help("Test duration in seconds")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("URL")
                        .help("Target API base URL"),
                )
                .arg(
                    Arg::new("profile")
                        .short('p')
                        .long("profile")
                        .value_name("NAME")
                        .help("Task weight profile"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_name("SEED")
                        .help("Base seed for per-user random generators")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("build-pool")
                .about("Harvest the data pool from live sources and write the fixture"),
        )
        .subcommand(
            Command::new("preview")
                .about("Print generated payloads without sending them")
                .arg(
                    Arg::new("task")
                        .long("task")
                        .value_name("TASK")
                        .help("Task to generate payloads for")
                        .value_parser(PossibleValuesParser::new(task_names))
                        .required(true),
                )
                .arg(
                    Arg::new("variant")
                        .long("variant")
                        .value_name("NAME")
                        .help("Payload variant; random when omitted"),
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("NUM")
                        .help("Number of payloads")
                        .value_parser(value_parser!(u32))
                        .default_value("1"),
                )
                .arg(
                    Arg::new("user")
                        .long("user")
                        .value_name("INDEX")
                        .help("Virtual user index whose ranges are used")
                        .value_parser(value_parser!(u64))
                        .default_value("0"),
                ),
        )
        .subcommand(Command::new("tasks").about("Show the active task weights"))
}

fn init_tracing(matches: &ArgMatches) -> Result<()> {
    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .init();
    Ok(())
}

fn load_configuration(matches: &ArgMatches) -> Result<LoadTestConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            let mut config = LoadTestConfig::from_file(path)?;
            config
                .apply_env_overrides()
                .context("invalid environment override")?;
            config
        }
        None => LoadTestConfig::from_env().context("invalid environment override")?,
    };
    Ok(config)
}

async fn handle_run(mut config: LoadTestConfig, matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("live") {
        config.data_source.mode = DataSourceMode::Live;
    }
    if let Some(users) = matches.get_one::<u32>("users") {
        config.load.users = *users;
    }
    if let Some(rate) = matches.get_one::<f64>("spawn-rate") {
        config.load.spawn_rate = *rate;
    }
    if let Some(run_time) = matches.get_one::<u64>("run-time") {
        config.load.run_time_seconds = *run_time;
    }
    if let Some(host) = matches.get_one::<String>("host") {
        config.general.host = host.clone();
    }
    if let Some(profile) = matches.get_one::<String>("profile") {
        config.task_weights.active_profile = profile.clone();
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.general.seed = Some(*seed);
    }
    config.validate()?;

    let pool = DataPoolProvider::new(config.data_source.clone())
        .build(
            config.data_source.mode,
            &config.general,
            config.pagination.seed_page_size,
        )
        .await
        .context("failed to build data pool")?;

    let dispatcher = Arc::new(HttpDispatcher::new(&config.general)?);
    let runner = LoadRunner::new(config, Arc::new(pool), dispatcher)?;

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping users");
            token.cancel();
        }
    });

    let summary = runner.run().await?;
    info!(
        "🎯 Load test completed: {} requests, {} failed",
        summary.total_requests, summary.failed_requests
    );
    Ok(())
}

async fn handle_build_pool(config: LoadTestConfig) -> Result<()> {
    config.validate()?;
    let pool = DataPoolProvider::new(config.data_source.clone())
        .build(
            DataSourceMode::Live,
            &config.general,
            config.pagination.seed_page_size,
        )
        .await
        .context("failed to build data pool")?;

    info!(
        path = %config.data_source.fixture_path.display(),
        bundles = pool.bundle_ids.len(),
        "✅ Data pool fixture written"
    );
    Ok(())
}

async fn handle_preview(config: LoadTestConfig, matches: &ArgMatches) -> Result<()> {
    let task: TaskKind = matches
        .get_one::<String>("task")
        .context("--task is required")?
        .parse()?;
    let variant = matches.get_one::<String>("variant").map(String::as_str);
    let count = matches.get_one::<u32>("count").copied().unwrap_or(1);
    let user_index = matches.get_one::<u64>("user").copied().unwrap_or(0);

    let pool = DataPoolProvider::new(config.data_source.clone())
        .build(
            DataSourceMode::Static,
            &config.general,
            config.pagination.seed_page_size,
        )
        .await
        .context("failed to load data pool")?;

    let mut rng = match config.general.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(user_index)),
        None => StdRng::from_entropy(),
    };
    let session = UserSession::start(
        user_index,
        &pool,
        config.general.fixed_session_id.as_deref(),
        &config.ranges,
        &mut rng,
    )?;

    for _ in 0..count {
        let generator = ApiGenerator::new(task, &pool, &session, &config.pagination, &mut rng)?;
        let generated = generator.generate(variant, &pool, &mut rng)?;
        println!(
            "{} {} ({})\n{}",
            generator.method(),
            generator.endpoint(),
            generated.variant,
            serde_json::to_string_pretty(&generated.payload)?
        );
    }
    Ok(())
}

fn handle_tasks(config: LoadTestConfig) -> Result<()> {
    let scheduler = WeightedTaskScheduler::from_config(&config.task_weights)?;

    println!(
        "Weight profile: {} (total weight {})",
        config.task_weights.active_profile,
        scheduler.total_weight()
    );
    println!(
        "{:<22} {:>6} {:>7}  {:<6} {:<40} VARIANTS",
        "TASK", "WEIGHT", "SHARE", "METHOD", "ENDPOINT"
    );
    for descriptor in scheduler.descriptors() {
        println!(
            "{:<22} {:>6} {:>6.1}%  {:<6} {:<40} {}",
            descriptor.name(),
            descriptor.weight,
            scheduler.probability(descriptor.task) * 100.0,
            descriptor.method(),
            descriptor.endpoint(),
            payloads::variant_names(descriptor.task).join(", ")
        );
    }
    Ok(())
}
