//! Periodic background jobs.
//!
//! Jobs are registered with an [`IntervalScheduler`] that wakes up on a fixed
//! tick, fires every job whose period elapsed (subject to its trigger
//! probability) and runs each handler in its own task so a slow or failing
//! job never blocks the others.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, SchedulerHandle};
pub use job::{BackgroundJob, FnJob, Jitter, JitterResolution, JobError, JobSchedule};
pub use scheduler::{create_scheduler, IntervalScheduler, SchedulerError};
