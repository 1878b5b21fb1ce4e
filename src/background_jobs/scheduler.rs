use super::context::JobContext;
use super::handle::{JobEntry, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JitterResolution, JobError, JobSchedule};
use crate::channels::ChannelCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest period a jittered schedule can shrink to.
const MIN_EFFECTIVE_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Job name already registered: {0}")]
    DuplicateJobName(String),

    #[error("Invalid schedule for job {name}: {reason}")]
    InvalidSchedule { name: String, reason: String },

    #[error("Tick interval must be greater than zero")]
    InvalidTickInterval,
}

/// Create a scheduler and a handle for interacting with it.
pub fn create_scheduler(job_context: JobContext) -> (IntervalScheduler, SchedulerHandle) {
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let shutdown_token = CancellationToken::new();
    let scheduler = IntervalScheduler {
        shared_state: Arc::clone(&shared_state),
        shutdown_token: shutdown_token.clone(),
        job_context,
    };
    let handle = SchedulerHandle::new(shared_state, shutdown_token);
    (scheduler, handle)
}

/// Drives registered jobs on a shared tick.
///
/// On every tick each job whose period has elapsed since its last fire gets
/// its due window reset to now, then passes its trigger chance or not. Jobs
/// that pass are spawned detached, so a slow or failing handler never holds
/// up the scan or other jobs.
pub struct IntervalScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl IntervalScheduler {
    /// Register a job with its own default schedule.
    pub async fn register(&self, job: Arc<dyn BackgroundJob>) -> Result<(), SchedulerError> {
        let schedule = job.schedule();
        self.register_with_schedule(job, schedule).await
    }

    /// Register a job with an explicit schedule, e.g. after configuration overrides.
    pub async fn register_with_schedule(
        &self,
        job: Arc<dyn BackgroundJob>,
        schedule: JobSchedule,
    ) -> Result<(), SchedulerError> {
        let name = job.name().to_string();
        let mut state = self.shared_state.write().await;
        if state.find(&name).is_some() {
            return Err(SchedulerError::DuplicateJobName(name));
        }
        validate_schedule(&name, &schedule)?;

        let (effective_period, per_fire_jitter) = match schedule.jitter {
            None => (schedule.period, None),
            Some(jitter) => {
                let factor = self
                    .job_context
                    .chance
                    .floating(jitter.min_factor, jitter.max_factor)
                    .map_err(|e| SchedulerError::InvalidSchedule {
                        name: name.clone(),
                        reason: e.to_string(),
                    })?;
                let per_fire = match jitter.resolution {
                    JitterResolution::OnRegistration => None,
                    JitterResolution::PerFire => Some((jitter.min_factor, jitter.max_factor)),
                };
                (scale_period(schedule.period, factor), per_fire)
            }
        };

        info!(
            "Registering job: {} - {} (every {:?}, {}% chance)",
            name,
            job.description(),
            effective_period,
            schedule.trigger_probability
        );
        state.jobs.push(JobEntry {
            job,
            base_period: schedule.period,
            effective_period,
            trigger_probability: schedule.trigger_probability,
            per_fire_jitter,
            last_fired_at: None,
            fire_count: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
        });
        Ok(())
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Tick every `tick_interval` until the handle stops the scheduler.
    ///
    /// The first tick happens immediately and anchors every job, so no job
    /// fires before one full period has passed.
    pub async fn run_forever(&self, tick_interval: Duration) -> Result<(), SchedulerError> {
        if tick_interval.is_zero() {
            return Err(SchedulerError::InvalidTickInterval);
        }

        let job_count = self.job_count().await;
        info!(
            "Starting interval scheduler with {} registered jobs, ticking every {:?}",
            job_count, tick_interval
        );

        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
                now = ticker.tick() => {
                    let fired = self.tick(now).await;
                    if !fired.is_empty() {
                        debug!("Tick dispatched {:?}", fired);
                    }
                }
            }
        }

        info!("Interval scheduler stopped");
        Ok(())
    }

    /// Scan all jobs once at `now` and dispatch the ones that are due.
    ///
    /// Returns the names of the jobs whose handlers were spawned.
    pub async fn tick(&self, now: Instant) -> Vec<String> {
        let chance = &self.job_context.chance;
        let mut due = Vec::new();

        let idle = {
            let mut state = self.shared_state.write().await;
            for entry in state.jobs.iter_mut() {
                let Some(last_fired_at) = entry.last_fired_at else {
                    entry.last_fired_at = Some(now);
                    continue;
                };
                if now.saturating_duration_since(last_fired_at) < entry.effective_period {
                    continue;
                }

                // The window resets whether or not the trigger chance passes.
                entry.last_fired_at = Some(now);

                if let Some((min_factor, max_factor)) = entry.per_fire_jitter {
                    match chance.floating(min_factor, max_factor) {
                        Ok(factor) => {
                            entry.effective_period = scale_period(entry.base_period, factor)
                        }
                        Err(e) => warn!("Failed to re-roll jitter for {}: {}", entry.job.name(), e),
                    }
                }

                let probability = entry.trigger_probability;
                if probability < 100.0 && !chance.bool(probability) {
                    debug!(
                        "Job {} was due but missed its {}% trigger chance",
                        entry.job.name(),
                        probability
                    );
                    continue;
                }

                entry.fire_count += 1;
                due.push((Arc::clone(&entry.job), Arc::clone(&entry.in_flight)));
            }
            Arc::clone(&state.idle)
        };

        due.into_iter()
            .map(|(job, in_flight)| {
                let name = job.name().to_string();
                self.spawn_job(job, in_flight, Arc::clone(&idle));
                name
            })
            .collect()
    }

    /// Spawn a job execution task.
    fn spawn_job(&self, job: Arc<dyn BackgroundJob>, in_flight: Arc<AtomicUsize>, idle: Arc<Notify>) {
        let ctx = self.job_context.clone();
        let channels = Arc::clone(&ctx.channels);
        let job_name = job.name().to_string();

        in_flight.fetch_add(1, Ordering::SeqCst);
        info!("Starting job: {}", job_name);

        tokio::spawn(async move {
            let start_time = Instant::now();
            // The inner task turns a handler panic into a JoinError.
            let result = tokio::spawn(async move { job.execute(&ctx).await }).await;
            let elapsed = start_time.elapsed();

            let fault = match result {
                Ok(Ok(())) => {
                    info!("Job {} completed successfully in {:?}", job_name, elapsed);
                    None
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_name, elapsed);
                    None
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_name, elapsed, e);
                    Some(format!("Job {} failed: {}", job_name, e))
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_name, elapsed, e);
                    Some(format!("Job {} panicked: {}", job_name, e))
                }
            };

            if let Some(text) = fault {
                if let Err(e) = channels.send(ChannelCode::Errors, &text).await {
                    error!("Failed to report fault of job {}: {}", job_name, e);
                }
            }

            in_flight.fetch_sub(1, Ordering::SeqCst);
            idle.notify_waiters();
        });
    }
}

fn validate_schedule(name: &str, schedule: &JobSchedule) -> Result<(), SchedulerError> {
    let invalid = |reason: &str| SchedulerError::InvalidSchedule {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if schedule.period.is_zero() {
        return Err(invalid("period must be greater than zero"));
    }
    if !(0.0..=100.0).contains(&schedule.trigger_probability) {
        return Err(invalid("trigger probability must be within 0..=100"));
    }
    if let Some(jitter) = schedule.jitter {
        if !jitter.min_factor.is_finite() || !jitter.max_factor.is_finite() {
            return Err(invalid("jitter factors must be finite"));
        }
        if jitter.min_factor <= 0.0 {
            return Err(invalid("jitter factors must be positive"));
        }
        if jitter.min_factor > jitter.max_factor {
            return Err(invalid("jitter min factor exceeds max factor"));
        }
    }
    Ok(())
}

fn scale_period(period: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(period.as_secs_f64() * factor)
        .unwrap_or(Duration::MAX)
        .max(MIN_EFFECTIVE_PERIOD)
}
