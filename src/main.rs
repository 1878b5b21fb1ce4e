use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coop_events::background_jobs::jobs::{
    FoxHuntJob, NewDayJob, TemporaryMessagesFlushJob, WoodcuttingJob,
};
use coop_events::background_jobs::{create_scheduler, BackgroundJob, JobContext};
use coop_events::chance::{ChanceSource, SeededChance};
use coop_events::channels::{ChannelSink, LogChannelSink};
use coop_events::config;
use coop_events::items::ResourceGuard;
use coop_events::ledger::{LedgerStore, SqliteLedgerStore, StateStore};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the ledger database (ledger.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Seconds between scheduler wake-ups.
    #[clap(long, default_value_t = config::DEFAULT_TICK_INTERVAL_SECS)]
    pub tick_interval_secs: u64,

    /// Base event period in seconds; job cadences are multiples of it.
    #[clap(long, default_value_t = config::DEFAULT_BASE_TICK_SECS)]
    pub base_tick_secs: u64,

    /// Fixed seed for reproducible runs.
    #[clap(long)]
    pub seed: Option<u64>,

    /// Community activity multiplier for event drop sizes.
    #[clap(long, default_value_t = config::DEFAULT_COMMUNITY_VELOCITY)]
    pub community_velocity: i64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            tick_interval_secs: args.tick_interval_secs,
            base_tick_secs: args.base_tick_secs,
            seed: args.seed,
            community_velocity: args.community_velocity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  tick_interval: {:?}", app_config.tick_interval);
    info!("  base_tick: {:?}", app_config.base_tick);

    if !app_config.ledger_db_path().exists() {
        info!(
            "Creating new ledger database at {:?}",
            app_config.ledger_db_path()
        );
    }
    let ledger_store = Arc::new(SqliteLedgerStore::new(app_config.ledger_db_path())?);

    let chance: Arc<dyn ChanceSource> = match app_config.seed {
        Some(seed) => {
            info!("Using fixed chance seed {}", seed);
            Arc::new(SeededChance::from_seed(seed))
        }
        None => Arc::new(SeededChance::from_entropy()),
    };

    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(
        shutdown_token.child_token(),
        ResourceGuard::new(ledger_store.clone() as Arc<dyn LedgerStore>),
        ledger_store.clone() as Arc<dyn StateStore>,
        Arc::new(LogChannelSink::new()) as Arc<dyn ChannelSink>,
        chance,
    );

    let (scheduler, scheduler_handle) = create_scheduler(job_context);

    let base_tick = app_config.base_tick;
    let jobs: Vec<Arc<dyn BackgroundJob>> = vec![
        Arc::new(WoodcuttingJob::new(base_tick, app_config.community_velocity)),
        Arc::new(FoxHuntJob::new(base_tick)),
        Arc::new(NewDayJob::new(base_tick)),
        Arc::new(TemporaryMessagesFlushJob::new(base_tick)),
    ];
    for job in jobs {
        let settings = app_config.job(job.name());
        if !settings.enabled {
            info!("Job {} disabled by configuration", job.name());
            continue;
        }
        let schedule = settings.apply(job.schedule());
        scheduler
            .register_with_schedule(job, schedule)
            .await
            .context("Failed to register job")?;
    }

    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );

    tokio::select! {
        result = scheduler.run_forever(app_config.tick_interval) => {
            if let Err(e) = &result {
                error!("Scheduler stopped: {}", e);
            }
            result?;
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            scheduler_handle.stop();
            shutdown_token.cancel();
            // Give running jobs a moment to observe cancellation
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    Ok(())
}
