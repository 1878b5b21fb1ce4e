use super::context::JobContext;
use crate::chance::ChanceError;
use crate::channels::ChannelError;
use crate::items::{ActionError, GuardError};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// When the random period multiplier of a [`Jitter`] is rolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterResolution {
    /// Rolled once when the job is registered; the period then stays fixed.
    OnRegistration,
    /// Rolled again after every fire.
    PerFire,
}

/// Random multiplier applied to a job's base period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub min_factor: f64,
    pub max_factor: f64,
    pub resolution: JitterResolution,
}

/// Cadence of an interval job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSchedule {
    /// Base period between fires.
    pub period: Duration,
    /// Percent chance (0-100) that a due fire actually runs the job.
    pub trigger_probability: f64,
    pub jitter: Option<Jitter>,
}

impl JobSchedule {
    /// Fire every `period`, always.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            trigger_probability: 100.0,
            jitter: None,
        }
    }

    pub fn with_probability(mut self, trigger_probability: f64) -> Self {
        self.trigger_probability = trigger_probability;
        self
    }

    pub fn with_jitter(mut self, min_factor: f64, max_factor: f64, resolution: JitterResolution) -> Self {
        self.jitter = Some(Jitter {
            min_factor,
            max_factor,
            resolution,
        });
        self
    }
}

/// Errors that can occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Chance(#[from] ChanceError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::ExecutionFailed(format!("{:#}", e))
    }
}

/// Trait for interval jobs.
///
/// Jobs run detached from the scheduler loop. A slow run may overlap the
/// next one; a job that must not overlap itself has to guard against it.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique name, also used as the key for configuration overrides.
    fn name(&self) -> &str;

    /// Description of what this job does.
    fn description(&self) -> &str;

    /// Default cadence, before configuration overrides.
    fn schedule(&self) -> JobSchedule;

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Adapts an async closure into a [`BackgroundJob`].
pub struct FnJob<F> {
    name: String,
    description: String,
    schedule: JobSchedule,
    handler: F,
}

impl<F, Fut> FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    pub fn new(name: impl Into<String>, schedule: JobSchedule, handler: F) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            schedule,
            handler,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> BackgroundJob for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schedule(&self) -> JobSchedule {
        self.schedule.clone()
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        (self.handler)(ctx.clone()).await
    }
}
