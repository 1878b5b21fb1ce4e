//! Common test infrastructure
//!
//! Builds a ledger on a throwaway SQLite file and a job context wired to a
//! recording channel sink, so tests can inspect every message posted.

#![allow(dead_code)]

use coop_events::background_jobs::JobContext;
use coop_events::chance::ChanceSource;
use coop_events::channels::RecordingChannelSink;
use coop_events::items::ResourceGuard;
use coop_events::ledger::SqliteLedgerStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

/// SQLite ledger living in a temporary directory.
pub struct TestLedger {
    // Held so the directory outlives the store.
    pub dir: TempDir,
    pub store: Arc<SqliteLedgerStore>,
}

impl TestLedger {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteLedgerStore::new(dir.path().join("ledger.db")).unwrap());
        Self { dir, store }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("ledger.db")
    }

    /// A second, independent connection to the same database file.
    pub fn reopen(&self) -> Arc<SqliteLedgerStore> {
        Arc::new(SqliteLedgerStore::new(self.db_path()).unwrap())
    }

    pub fn guard(&self) -> ResourceGuard {
        ResourceGuard::new(self.store.clone())
    }

    pub fn context(&self, chance: Arc<dyn ChanceSource>) -> (JobContext, Arc<RecordingChannelSink>) {
        let sink = Arc::new(RecordingChannelSink::new());
        let ctx = JobContext::new(
            CancellationToken::new(),
            self.guard(),
            self.store.clone(),
            sink.clone(),
            chance,
        );
        (ctx, sink)
    }
}
