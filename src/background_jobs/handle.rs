use super::job::BackgroundJob;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Information about a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
    /// Period after jitter resolution.
    pub effective_period: Duration,
    pub trigger_probability: f64,
    /// `None` until the scheduler has seen the job on a tick.
    pub last_fired_at: Option<Instant>,
    /// Number of times the handler was dispatched.
    pub fire_count: u64,
    pub in_flight: usize,
}

/// Scheduler-owned record for one registered job.
pub(super) struct JobEntry {
    pub job: Arc<dyn BackgroundJob>,
    pub base_period: Duration,
    pub effective_period: Duration,
    pub trigger_probability: f64,
    pub per_fire_jitter: Option<(f64, f64)>,
    pub last_fired_at: Option<Instant>,
    pub fire_count: u64,
    pub in_flight: Arc<AtomicUsize>,
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub(super) struct SharedJobState {
    /// Registered jobs in registration order.
    pub(super) jobs: Vec<JobEntry>,
    /// Signalled whenever a dispatched handler finishes.
    pub(super) idle: Arc<Notify>,
}

impl SharedJobState {
    pub(super) fn find(&self, name: &str) -> Option<&JobEntry> {
        self.jobs.iter().find(|e| e.job.name() == name)
    }

    fn total_in_flight(&self) -> usize {
        self.jobs
            .iter()
            .map(|e| e.in_flight.load(Ordering::SeqCst))
            .sum()
    }
}

/// Cloneable handle to inspect and stop a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared_state: Arc<RwLock<SharedJobState>>,
    shutdown_token: CancellationToken,
}

impl SchedulerHandle {
    pub(super) fn new(
        shared_state: Arc<RwLock<SharedJobState>>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            shared_state,
            shutdown_token,
        }
    }

    /// Stop ticking. Handlers already running are left to finish.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        state
            .jobs
            .iter()
            .map(|entry| JobInfo {
                name: entry.job.name().to_string(),
                description: entry.job.description().to_string(),
                effective_period: entry.effective_period,
                trigger_probability: entry.trigger_probability,
                last_fired_at: entry.last_fired_at,
                fire_count: entry.fire_count,
                in_flight: entry.in_flight.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Number of running invocations of `name`, or `None` for an unknown job.
    pub async fn in_flight(&self, name: &str) -> Option<usize> {
        let state = self.shared_state.read().await;
        state
            .find(name)
            .map(|e| e.in_flight.load(Ordering::SeqCst))
    }

    /// Wait until no handler is running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = Arc::clone(&self.shared_state.read().await.idle);
            let notified = idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared_state.read().await.total_in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
