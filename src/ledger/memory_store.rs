use super::models::{AdjustOutcome, TransactionRecord};
use super::{LedgerStore, StateStore};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    items: HashMap<(String, String), i64>,
    transactions: Vec<TransactionRecord>,
    kv: HashMap<String, String>,
}

/// In-process ledger used by tests and dry runs.
///
/// Atomicity comes from a single mutex. [`MemoryLedgerStore::set_unavailable`]
/// makes every subsequent call fail, which lets callers exercise their
/// store-error paths.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    /// Fail `atomic_adjust` calls with a positive delta for this user.
    failing_grantee: Mutex<Option<String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_grants_to(&self, user_id: Option<&str>) {
        if let Ok(mut grantee) = self.failing_grantee.lock() {
            *grantee = user_id.map(str::to_string);
        }
    }

    fn grant_blocked(&self, user_id: &str) -> bool {
        self.failing_grantee
            .lock()
            .map(|g| g.as_deref() == Some(user_id))
            .unwrap_or(false)
    }

    /// Seed a quantity directly, bypassing the transaction log.
    pub fn seed(&self, user_id: &str, item_code: &str, quantity: i64) {
        if let Ok(mut state) = self.state.lock() {
            state
                .items
                .insert((user_id.to_string(), item_code.to_string()), quantity);
        }
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state
            .lock()
            .map(|s| s.transactions.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Ledger store unavailable");
        }
        self.state
            .lock()
            .map_err(|_| anyhow!("Ledger state lock poisoned"))
    }
}

fn key(user_id: &str, item_code: &str) -> (String, String) {
    (user_id.to_string(), item_code.to_string())
}

impl LedgerStore for MemoryLedgerStore {
    fn get_quantity(&self, user_id: &str, item_code: &str) -> Result<i64> {
        let state = self.lock()?;
        Ok(state
            .items
            .get(&key(user_id, item_code))
            .copied()
            .unwrap_or(0))
    }

    fn atomic_adjust(
        &self,
        user_id: &str,
        item_code: &str,
        delta: i64,
        floor_at_zero: bool,
    ) -> Result<AdjustOutcome> {
        if delta > 0 && self.grant_blocked(user_id) {
            bail!("Ledger store unavailable for grants to {}", user_id);
        }
        let mut state = self.lock()?;
        let previous = state
            .items
            .get(&key(user_id, item_code))
            .copied()
            .unwrap_or(0);
        let target = previous
            .checked_add(delta)
            .ok_or_else(|| anyhow!("Quantity overflow for {} {}", user_id, item_code))?;

        let new_quantity = if target >= 0 {
            target
        } else if floor_at_zero {
            0
        } else {
            return Ok(AdjustOutcome {
                ok: false,
                previous_quantity: previous,
                new_quantity: previous,
            });
        };

        state.items.insert(key(user_id, item_code), new_quantity);
        Ok(AdjustOutcome {
            ok: true,
            previous_quantity: previous,
            new_quantity,
        })
    }

    fn conditional_decrement(&self, user_id: &str, item_code: &str, amount: i64) -> Result<bool> {
        if amount <= 0 {
            bail!("Conditional decrement amount must be positive, got {}", amount);
        }
        let mut state = self.lock()?;
        match state.items.get_mut(&key(user_id, item_code)) {
            Some(qty) if *qty >= amount => {
                *qty -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Checks and takes every row under one lock, so a short manifest never
    /// hides stock from a concurrent caller.
    fn conditional_decrement_many(&self, user_id: &str, wants: &[(String, i64)]) -> Result<bool> {
        if let Some((item_code, amount)) = wants.iter().find(|(_, amount)| *amount <= 0) {
            bail!("Conditional decrement amount for {} must be positive, got {}", item_code, amount);
        }
        let mut state = self.lock()?;

        let mut totals: HashMap<&str, i64> = HashMap::new();
        for (item_code, amount) in wants {
            *totals.entry(item_code.as_str()).or_insert(0) += amount;
        }
        let covered = totals.iter().all(|(item_code, amount)| {
            state
                .items
                .get(&key(user_id, item_code))
                .is_some_and(|qty| qty >= amount)
        });
        if !covered {
            return Ok(false);
        }

        for (item_code, amount) in totals {
            if let Some(qty) = state.items.get_mut(&key(user_id, item_code)) {
                *qty -= amount;
            }
        }
        Ok(true)
    }

    fn record_transaction(&self, record: &TransactionRecord) -> Result<()> {
        self.lock()?.transactions.push(record.clone());
        Ok(())
    }

    fn transactions_since(&self, since_timestamp: i64) -> Result<Vec<TransactionRecord>> {
        let state = self.lock()?;
        let mut records: Vec<TransactionRecord> = state
            .transactions
            .iter()
            .filter(|r| r.occurred_at >= since_timestamp)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.occurred_at);
        Ok(records)
    }
}

impl StateStore for MemoryLedgerStore {
    fn get_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.kv.get(key).cloned())
    }

    fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn swap_state(&self, key: &str, value: &str) -> Result<Option<String>> {
        Ok(self.lock()?.kv.insert(key.to_string(), value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_decrement_many_is_all_or_nothing() {
        let store = MemoryLedgerStore::new();
        store.seed("u1", "AXE", 1);
        store.seed("u1", "WOOD", 1);

        let wants = vec![("AXE".to_string(), 1), ("WOOD".to_string(), 2)];
        assert!(!store.conditional_decrement_many("u1", &wants).unwrap());
        assert_eq!(store.get_quantity("u1", "AXE").unwrap(), 1);
        assert_eq!(store.get_quantity("u1", "WOOD").unwrap(), 1);

        let wants = vec![("WOOD".to_string(), 1), ("AXE".to_string(), 1)];
        assert!(store.conditional_decrement_many("u1", &wants).unwrap());
        assert_eq!(store.get_quantity("u1", "AXE").unwrap(), 0);
        assert_eq!(store.get_quantity("u1", "WOOD").unwrap(), 0);
    }

    #[test]
    fn test_overlapping_manifests_never_both_fail() {
        // {X, Y} is always covered; {Y, Z} never is. A short manifest must
        // not hide stock from the one that fits.
        for _ in 0..200 {
            let store = Arc::new(MemoryLedgerStore::new());
            store.seed("u1", "X", 1);
            store.seed("u1", "Y", 1);
            let barrier = Arc::new(Barrier::new(2));

            let fits = {
                let (store, barrier) = (store.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    let wants = vec![("X".to_string(), 1), ("Y".to_string(), 1)];
                    store.conditional_decrement_many("u1", &wants).unwrap()
                })
            };
            let short = {
                let (store, barrier) = (store.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    let wants = vec![("Y".to_string(), 1), ("Z".to_string(), 1)];
                    store.conditional_decrement_many("u1", &wants).unwrap()
                })
            };

            assert!(fits.join().unwrap());
            assert!(!short.join().unwrap());
            assert_eq!(store.get_quantity("u1", "Y").unwrap(), 0);
        }
    }

    #[test]
    fn test_unavailable_fails_every_call() {
        let store = MemoryLedgerStore::new();
        store.set_unavailable(true);
        assert!(store.get_quantity("u1", "WOOD").is_err());
        assert!(store.atomic_adjust("u1", "WOOD", 1, false).is_err());
        assert!(store.get_state("k").is_err());

        store.set_unavailable(false);
        assert_eq!(store.get_quantity("u1", "WOOD").unwrap(), 0);
    }

    #[test]
    fn test_failing_grantee_only_blocks_their_grants() {
        let store = MemoryLedgerStore::new();
        store.seed("u1", "WOOD", 2);
        store.fail_grants_to(Some("u1"));
        assert!(store.atomic_adjust("u1", "WOOD", 1, false).is_err());
        assert!(store.atomic_adjust("u2", "WOOD", 1, false).is_ok());
        assert!(store.atomic_adjust("u1", "WOOD", -1, false).unwrap().ok);
        assert!(store.conditional_decrement("u1", "WOOD", 1).unwrap());
    }

    #[test]
    fn test_swap_state_returns_previous() {
        let store = MemoryLedgerStore::new();
        assert_eq!(store.swap_state("stolen_rare_egg", "0").unwrap(), None);
        store.set_state("stolen_rare_egg", "4").unwrap();
        assert_eq!(
            store.swap_state("stolen_rare_egg", "0").unwrap().as_deref(),
            Some("4")
        );
    }
}
