//! Item economy on top of the ledger.

mod actions;
pub mod codes;
mod guard;

pub use actions::{
    ActionError, EconomyActions, GiftOutcome, LegendaryEggOutcome, PickupOutcome, RedropOutcome,
    DROP_LIFETIME_SECS, LEGENDARY_EGG_POINTS,
};
pub use guard::{GuardError, ResourceGuard, TransferOutcome};
