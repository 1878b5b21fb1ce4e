//! Event jobs run by the interval scheduler.

pub mod foxhunt;
pub mod new_day;
pub mod temporary_messages_flush;
pub mod woodcutting;

pub use foxhunt::{FoxAction, FoxHuntJob, FoxOutcome};
pub use new_day::NewDayJob;
pub use temporary_messages_flush::TemporaryMessagesFlushJob;
pub use woodcutting::{ChopOutcome, WoodcuttingJob};

/// Names of every built-in job, for validating per-job configuration.
pub const JOB_NAMES: [&str; 4] = [
    "woodcutting",
    "foxhunt",
    "new_day",
    "temporary_messages_flush",
];
