use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compound want: item code -> required quantity.
///
/// Codes are kept sorted so every consumer walks the rows of one user in
/// the same order. Adding a code twice sums the quantities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemManifest {
    items: BTreeMap<String, i64>,
}

impl ItemManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(item_code: impl Into<String>, quantity: i64) -> Self {
        Self::new().with(item_code, quantity)
    }

    pub fn with(mut self, item_code: impl Into<String>, quantity: i64) -> Self {
        self.add(item_code, quantity);
        self
    }

    pub fn add(&mut self, item_code: impl Into<String>, quantity: i64) {
        let entry = self.items.entry(item_code.into()).or_insert(0);
        *entry = entry.saturating_add(quantity);
    }

    pub fn get(&self, item_code: &str) -> Option<i64> {
        self.items.get(item_code).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.items.iter().map(|(code, qty)| (code.as_str(), *qty))
    }

    /// First entry whose quantity is not a positive integer, if any.
    pub fn first_invalid(&self) -> Option<(&str, i64)> {
        self.iter().find(|(_, qty)| *qty <= 0)
    }

    pub fn to_pairs(&self) -> Vec<(String, i64)> {
        self.items.iter().map(|(c, q)| (c.clone(), *q)).collect()
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for ItemManifest {
    fn from_iter<T: IntoIterator<Item = (S, i64)>>(iter: T) -> Self {
        let mut manifest = ItemManifest::new();
        for (code, qty) in iter {
            manifest.add(code, qty);
        }
        manifest
    }
}

/// Append-only audit entry for one applied ledger change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: String,
    pub item_code: String,
    pub delta: i64,
    pub reason: String,
    /// Unix timestamp (seconds) when the change was applied.
    pub occurred_at: i64,
}

impl TransactionRecord {
    pub fn now(user_id: &str, item_code: &str, delta: i64, reason: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            item_code: item_code.to_string(),
            delta,
            reason: reason.to_string(),
            occurred_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Result of a single-row atomic adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustOutcome {
    /// False when the change was refused because it would go negative
    /// without `floor_at_zero`.
    pub ok: bool,
    pub previous_quantity: i64,
    pub new_quantity: i64,
}

impl AdjustOutcome {
    pub fn applied_delta(&self) -> i64 {
        self.new_quantity - self.previous_quantity
    }
}
