//! Persistent item ledger and small key/value state.
//!
//! The ledger owns one quantity row per `(user, item code)` plus an
//! append-only transaction log. Stores only guarantee single-row atomicity;
//! the compound rules live in [`crate::items::ResourceGuard`].

mod memory_store;
mod models;
mod schema;
mod sqlite_ledger_store;

pub use memory_store::MemoryLedgerStore;
pub use models::{AdjustOutcome, ItemManifest, TransactionRecord};
pub use schema::LEDGER_VERSIONED_SCHEMAS;
pub use sqlite_ledger_store::SqliteLedgerStore;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::error;

#[cfg_attr(feature = "mock", mockall::automock)]
pub trait LedgerStore: Send + Sync {
    /// Current quantity, zero when the row does not exist.
    fn get_quantity(&self, user_id: &str, item_code: &str) -> Result<i64>;

    /// Add `delta` to the row in one atomic step.
    ///
    /// A negative delta that would leave the row below zero is clamped to
    /// zero when `floor_at_zero` is set, and refused (`ok == false`, row
    /// untouched) otherwise.
    fn atomic_adjust(
        &self,
        user_id: &str,
        item_code: &str,
        delta: i64,
        floor_at_zero: bool,
    ) -> Result<AdjustOutcome>;

    /// Decrement by `amount` only if the row holds at least `amount`.
    fn conditional_decrement(&self, user_id: &str, item_code: &str, amount: i64) -> Result<bool>;

    /// Decrement every `(item code, amount)` pair or none of them.
    ///
    /// The default walks the pairs with [`LedgerStore::conditional_decrement`]
    /// and gives back what it took when a later row is short. Rows taken
    /// before the give-back are visible to other callers, so two overlapping
    /// manifests can both fail even when stock covered one of them. Stores
    /// that can lock several rows at once should override this.
    fn conditional_decrement_many(&self, user_id: &str, wants: &[(String, i64)]) -> Result<bool> {
        decrement_many_with_compensation(self, user_id, wants)
    }

    fn record_transaction(&self, record: &TransactionRecord) -> Result<()>;

    /// Transactions that occurred at or after `since_timestamp`, oldest first.
    fn transactions_since(&self, since_timestamp: i64) -> Result<Vec<TransactionRecord>>;
}

/// Process-external key/value state (current day marker, fox loot counters).
pub trait StateStore: Send + Sync {
    fn get_state(&self, key: &str) -> Result<Option<String>>;
    fn set_state(&self, key: &str, value: &str) -> Result<()>;
    /// Atomically replace the value, returning the previous one.
    fn swap_state(&self, key: &str, value: &str) -> Result<Option<String>>;
}

/// Run a synchronous store call on tokio's blocking pool.
///
/// Store calls may wait on file locks, so they never run on a runtime worker.
pub async fn run_blocking<S, T, F>(store: &Arc<S>, op: F) -> Result<T>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .context("Ledger store task failed")?
}

pub(crate) fn decrement_many_with_compensation<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: &str,
    wants: &[(String, i64)],
) -> Result<bool> {
    let mut sorted: Vec<&(String, i64)> = wants.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut taken: Vec<(&str, i64)> = Vec::with_capacity(sorted.len());
    for (item_code, amount) in sorted {
        match store.conditional_decrement(user_id, item_code, *amount) {
            Ok(true) => taken.push((item_code, *amount)),
            Ok(false) => {
                give_back(store, user_id, &taken);
                return Ok(false);
            }
            Err(e) => {
                give_back(store, user_id, &taken);
                return Err(e);
            }
        }
    }
    Ok(true)
}

fn give_back<S: LedgerStore + ?Sized>(store: &S, user_id: &str, taken: &[(&str, i64)]) {
    for (item_code, amount) in taken {
        if let Err(e) = store.atomic_adjust(user_id, item_code, *amount, false) {
            error!(
                "Failed to give back {} x{} to {} after partial decrement: {}",
                item_code, amount, user_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Row-level store relying on the default multi-row decrement.
    struct RowOnlyStore(MemoryLedgerStore);

    impl LedgerStore for RowOnlyStore {
        fn get_quantity(&self, user_id: &str, item_code: &str) -> Result<i64> {
            self.0.get_quantity(user_id, item_code)
        }

        fn atomic_adjust(
            &self,
            user_id: &str,
            item_code: &str,
            delta: i64,
            floor_at_zero: bool,
        ) -> Result<AdjustOutcome> {
            self.0.atomic_adjust(user_id, item_code, delta, floor_at_zero)
        }

        fn conditional_decrement(&self, user_id: &str, item_code: &str, amount: i64) -> Result<bool> {
            self.0.conditional_decrement(user_id, item_code, amount)
        }

        fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
            self.0.record_transaction(record)
        }

        fn transactions_since(&self, since_timestamp: i64) -> Result<Vec<TransactionRecord>> {
            self.0.transactions_since(since_timestamp)
        }
    }

    #[test]
    fn test_default_decrement_many_compensates() {
        let store = RowOnlyStore(MemoryLedgerStore::new());
        store.0.seed("u1", "AXE", 1);
        store.0.seed("u1", "WOOD", 1);

        let wants = vec![("AXE".to_string(), 1), ("WOOD".to_string(), 2)];
        assert!(!store.conditional_decrement_many("u1", &wants).unwrap());
        assert_eq!(store.get_quantity("u1", "AXE").unwrap(), 1);
        assert_eq!(store.get_quantity("u1", "WOOD").unwrap(), 1);

        let wants = vec![("WOOD".to_string(), 1), ("AXE".to_string(), 1)];
        assert!(store.conditional_decrement_many("u1", &wants).unwrap());
        assert_eq!(store.get_quantity("u1", "AXE").unwrap(), 0);
        assert_eq!(store.get_quantity("u1", "WOOD").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_blocking_returns_store_result() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.seed("u1", "WOOD", 3);

        let qty = run_blocking(&store, |s| s.get_quantity("u1", "WOOD"))
            .await
            .unwrap();
        assert_eq!(qty, 3);

        store.set_unavailable(true);
        assert!(run_blocking(&store, |s| s.get_quantity("u1", "WOOD"))
            .await
            .is_err());
    }
}
