mod file_config;

pub use file_config::{FileConfig, JobOverrideConfig};

use crate::background_jobs::jobs::JOB_NAMES;
use crate::background_jobs::JobSchedule;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BASE_TICK_SECS: u64 = 25 * 60;
pub const DEFAULT_COMMUNITY_VELOCITY: i64 = 1;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub tick_interval_secs: u64,
    pub base_tick_secs: u64,
    pub seed: Option<u64>,
    pub community_velocity: i64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            base_tick_secs: DEFAULT_BASE_TICK_SECS,
            seed: None,
            community_velocity: DEFAULT_COMMUNITY_VELOCITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub tick_interval: Duration,
    pub base_tick: Duration,
    pub seed: Option<u64>,
    pub community_velocity: i64,
    pub jobs: BTreeMap<String, JobSettings>,
}

/// Resolved per-job override. `None` keeps the job's own schedule value.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub enabled: bool,
    pub period: Option<Duration>,
    pub trigger_probability: Option<f64>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            period: None,
            trigger_probability: None,
        }
    }
}

impl JobSettings {
    /// Apply this override on top of a job's own schedule.
    ///
    /// An explicit period replaces the jittered cadence.
    pub fn apply(&self, schedule: JobSchedule) -> JobSchedule {
        let mut schedule = match self.period {
            Some(period) => JobSchedule {
                period,
                jitter: None,
                ..schedule
            },
            None => schedule,
        };
        if let Some(p) = self.trigger_probability {
            schedule.trigger_probability = p;
        }
        schedule
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let tick_interval_secs = file.tick_interval_secs.unwrap_or(cli.tick_interval_secs);
        if tick_interval_secs == 0 {
            bail!("tick_interval_secs must be greater than zero");
        }
        let base_tick_secs = file.base_tick_secs.unwrap_or(cli.base_tick_secs);
        if base_tick_secs == 0 {
            bail!("base_tick_secs must be greater than zero");
        }

        let seed = file.seed.or(cli.seed);
        let community_velocity = file.community_velocity.unwrap_or(cli.community_velocity);
        if community_velocity < 1 {
            bail!("community_velocity must be at least 1, got {}", community_velocity);
        }

        let mut jobs = BTreeMap::new();
        for (name, job) in file.jobs {
            jobs.insert(name.clone(), resolve_job(&name, job)?);
        }

        Ok(Self {
            db_dir,
            tick_interval: Duration::from_secs(tick_interval_secs),
            base_tick: Duration::from_secs(base_tick_secs),
            seed,
            community_velocity,
            jobs,
        })
    }

    pub fn ledger_db_path(&self) -> PathBuf {
        self.db_dir.join("ledger.db")
    }

    /// Settings for `name`, defaults when the file has no override.
    pub fn job(&self, name: &str) -> JobSettings {
        self.jobs.get(name).cloned().unwrap_or_default()
    }
}

fn resolve_job(name: &str, job: JobOverrideConfig) -> Result<JobSettings> {
    if !JOB_NAMES.contains(&name) {
        bail!(
            "Unknown job '{}' in config, expected one of: {}",
            name,
            JOB_NAMES.join(", ")
        );
    }
    if job.period_secs == Some(0) {
        bail!("jobs.{}.period_secs must be greater than zero", name);
    }
    if let Some(p) = job.trigger_probability {
        if !(0.0..=100.0).contains(&p) {
            bail!("jobs.{}.trigger_probability must be within 0..=100, got {}", name, p);
        }
    }
    Ok(JobSettings {
        enabled: job.enabled.unwrap_or(true),
        period: job.period_secs.map(Duration::from_secs),
        trigger_probability: job.trigger_probability,
    })
}
