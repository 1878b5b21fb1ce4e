//! Coop events library
//!
//! Interval scheduler for chance-gated community events and the resource
//! guard that keeps every item movement atomic. Exposed as a library for the
//! integration tests and the `coop-events` binary.

pub mod background_jobs;
pub mod chance;
pub mod channels;
pub mod config;
pub mod items;
pub mod ledger;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use background_jobs::{create_scheduler, IntervalScheduler, JobContext, SchedulerHandle};
pub use chance::{ChanceSource, SeededChance};
pub use items::{GuardError, ResourceGuard, TransferOutcome};
pub use ledger::{ItemManifest, LedgerStore, SqliteLedgerStore};
