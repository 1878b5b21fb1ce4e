//! Atomic, non-negative, audited ledger mutations.

use crate::ledger::{AdjustOutcome, ItemManifest, LedgerStore, TransactionRecord};
use anyhow::anyhow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Invalid quantity {quantity} for {item_code}: must be a positive integer")]
    InvalidQuantity { item_code: String, quantity: i64 },

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),
}

/// Result of [`ResourceGuard::transfer_or_nothing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Everything was consumed and granted. Holds the recipient's new total
    /// for each granted item code.
    Completed { granted: Vec<(String, i64)> },
    /// The giver lacked at least one consumed item; nothing changed.
    Insufficient,
}

/// Front door to the ledger for every consume/grant operation.
///
/// The guard never caches quantities. Each decision is pushed down to a
/// single conditional update in the store, so correctness does not depend
/// on any in-process lock. Store work runs on tokio's blocking pool; a
/// store waiting on a locked database never stalls other tasks.
#[derive(Clone)]
pub struct ResourceGuard {
    store: Arc<dyn LedgerStore>,
}

impl ResourceGuard {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Current quantity, read fresh from the store.
    pub async fn quantity(&self, user_id: &str, item_code: &str) -> Result<i64, GuardError> {
        let (user_id, item_code) = (user_id.to_string(), item_code.to_string());
        self.blocking(move |ledger| Ok(ledger.store.get_quantity(&user_id, &item_code)?))
            .await
    }

    /// Consume every item in `manifest` or none of them.
    ///
    /// `Ok(false)` means the user is short of at least one item, which is an
    /// expected outcome and not a fault.
    pub async fn use_many(
        &self,
        user_id: &str,
        manifest: &ItemManifest,
        reason: &str,
    ) -> Result<bool, GuardError> {
        validate_manifest(manifest)?;
        if manifest.is_empty() {
            return Ok(true);
        }

        let (user_id, manifest, reason) = (user_id.to_string(), manifest.clone(), reason.to_string());
        self.blocking(move |ledger| ledger.use_many_blocking(&user_id, &manifest, &reason))
            .await
    }

    /// Single-item form of [`ResourceGuard::use_many`].
    pub async fn use_item(
        &self,
        user_id: &str,
        item_code: &str,
        quantity: i64,
        reason: &str,
    ) -> Result<bool, GuardError> {
        self.use_many(user_id, &ItemManifest::single(item_code, quantity), reason)
            .await
    }

    /// Grant `quantity` and return the new total.
    pub async fn add(
        &self,
        user_id: &str,
        item_code: &str,
        quantity: i64,
        reason: &str,
    ) -> Result<i64, GuardError> {
        validate_quantity(item_code, quantity)?;
        let (user_id, item_code, reason) = owned(user_id, item_code, reason);
        self.blocking(move |ledger| ledger.adjust_blocking(&user_id, &item_code, quantity, &reason))
            .await
    }

    /// Remove up to `quantity`, flooring the row at zero, and return the new total.
    pub async fn subtract(
        &self,
        user_id: &str,
        item_code: &str,
        quantity: i64,
        reason: &str,
    ) -> Result<i64, GuardError> {
        validate_quantity(item_code, quantity)?;
        let (user_id, item_code, reason) = owned(user_id, item_code, reason);
        self.blocking(move |ledger| ledger.adjust_blocking(&user_id, &item_code, -quantity, &reason))
            .await
    }

    /// Consume `consume` from `from_user`, then grant `grant` to `to_user`.
    ///
    /// Nothing is granted unless the consumption fully succeeded. If a grant
    /// fails after consumption, the consumed items are refunded and any grants
    /// already applied are reversed before `StoreUnavailable` is returned.
    pub async fn transfer_or_nothing(
        &self,
        from_user: &str,
        consume: &ItemManifest,
        to_user: &str,
        grant: &ItemManifest,
        reason: &str,
    ) -> Result<TransferOutcome, GuardError> {
        validate_manifest(consume)?;
        validate_manifest(grant)?;

        let (from_user, to_user, reason) = owned(from_user, to_user, reason);
        let (consume, grant) = (consume.clone(), grant.clone());
        self.blocking(move |ledger| {
            ledger.transfer_blocking(&from_user, &consume, &to_user, &grant, &reason)
        })
        .await
    }

    /// Audit entries for changes at or after `since_timestamp` (unix seconds).
    pub async fn transactions_since(
        &self,
        since_timestamp: i64,
    ) -> Result<Vec<TransactionRecord>, GuardError> {
        self.blocking(move |ledger| Ok(ledger.store.transactions_since(since_timestamp)?))
            .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, GuardError>
    where
        T: Send + 'static,
        F: FnOnce(&ResourceGuard) -> Result<T, GuardError> + Send + 'static,
    {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || op(&ledger))
            .await
            .map_err(|e| GuardError::StoreUnavailable(anyhow!("Ledger task failed: {}", e)))?
    }

    fn use_many_blocking(
        &self,
        user_id: &str,
        manifest: &ItemManifest,
        reason: &str,
    ) -> Result<bool, GuardError> {
        let wants = manifest.to_pairs();
        if !self.store.conditional_decrement_many(user_id, &wants)? {
            debug!(
                "User {} lacks items for {:?} ({})",
                user_id, wants, reason
            );
            return Ok(false);
        }

        for (item_code, quantity) in manifest.iter() {
            self.record(user_id, item_code, -quantity, reason);
        }
        Ok(true)
    }

    /// Positive deltas grant; negative ones subtract floored at zero.
    fn adjust_blocking(
        &self,
        user_id: &str,
        item_code: &str,
        delta: i64,
        reason: &str,
    ) -> Result<i64, GuardError> {
        let outcome = self.store.atomic_adjust(user_id, item_code, delta, delta < 0)?;
        self.record_outcome(user_id, item_code, &outcome, reason);
        Ok(outcome.new_quantity)
    }

    fn transfer_blocking(
        &self,
        from_user: &str,
        consume: &ItemManifest,
        to_user: &str,
        grant: &ItemManifest,
        reason: &str,
    ) -> Result<TransferOutcome, GuardError> {
        if !consume.is_empty() && !self.use_many_blocking(from_user, consume, reason)? {
            return Ok(TransferOutcome::Insufficient);
        }

        let mut granted = Vec::with_capacity(grant.len());
        for (item_code, quantity) in grant.iter() {
            match self.adjust_blocking(to_user, item_code, quantity, reason) {
                Ok(total) => granted.push((item_code.to_string(), total)),
                Err(e) => {
                    error!(
                        "Grant of {} x{} to {} failed after consuming from {}: {}",
                        item_code, quantity, to_user, from_user, e
                    );
                    self.unwind_transfer(from_user, consume, to_user, grant, granted.len(), reason);
                    return Err(e);
                }
            }
        }

        Ok(TransferOutcome::Completed { granted })
    }

    fn unwind_transfer(
        &self,
        from_user: &str,
        consume: &ItemManifest,
        to_user: &str,
        grant: &ItemManifest,
        applied_grants: usize,
        reason: &str,
    ) {
        let revert_reason = format!("Reverted: {}", reason);
        for (item_code, quantity) in grant.iter().take(applied_grants) {
            if let Err(e) = self.adjust_blocking(to_user, item_code, -quantity, &revert_reason) {
                error!(
                    "Failed to reverse grant of {} x{} to {}: {}",
                    item_code, quantity, to_user, e
                );
            }
        }
        let refund_reason = format!("Refund: {}", reason);
        for (item_code, quantity) in consume.iter() {
            if let Err(e) = self.adjust_blocking(from_user, item_code, quantity, &refund_reason) {
                error!(
                    "Failed to refund {} x{} to {}: {}",
                    item_code, quantity, from_user, e
                );
            }
        }
    }

    fn record_outcome(&self, user_id: &str, item_code: &str, outcome: &AdjustOutcome, reason: &str) {
        let delta = outcome.applied_delta();
        if delta != 0 {
            self.record(user_id, item_code, delta, reason);
        }
    }

    // The row change is already committed, so a failed audit write is logged
    // rather than reported as a failed mutation.
    fn record(&self, user_id: &str, item_code: &str, delta: i64, reason: &str) {
        let record = TransactionRecord::now(user_id, item_code, delta, reason);
        if let Err(e) = self.store.record_transaction(&record) {
            warn!(
                "Failed to record transaction {} {} {}: {}",
                user_id, item_code, delta, e
            );
        }
    }
}

fn owned(a: &str, b: &str, c: &str) -> (String, String, String) {
    (a.to_string(), b.to_string(), c.to_string())
}

fn validate_quantity(item_code: &str, quantity: i64) -> Result<(), GuardError> {
    if quantity <= 0 {
        return Err(GuardError::InvalidQuantity {
            item_code: item_code.to_string(),
            quantity,
        });
    }
    Ok(())
}

fn validate_manifest(manifest: &ItemManifest) -> Result<(), GuardError> {
    match manifest.first_invalid() {
        Some((item_code, quantity)) => Err(GuardError::InvalidQuantity {
            item_code: item_code.to_string(),
            quantity,
        }),
        None => Ok(()),
    }
}
