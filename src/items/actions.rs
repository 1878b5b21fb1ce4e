//! User-triggered economy actions: gifting, dropping, picking up and using items.
//!
//! Every action consumes through the guard first and grants second.

use super::codes::{self, COOP_POINT, EMPTY_GIFTBOX, LEGENDARY_EGG};
use super::guard::{GuardError, ResourceGuard, TransferOutcome};
use crate::chance::{ChanceError, ChanceSource};
use crate::channels::{self, ChannelCode, ChannelError, ChannelSink, MessageHandle, TemporaryMessages};
use crate::ledger::ItemManifest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Points a legendary egg adds to whoever it lands on.
pub const LEGENDARY_EGG_POINTS: i64 = 25;

/// Chance (percent) that a dropped egg breaks when picked up.
const DROPPED_EGG_BREAK_CHANCE: f64 = 40.0;

/// Chance (percent) that a legendary egg lands on its user instead.
const LEGENDARY_BACKFIRE_CHANCE: f64 = 25.0;

/// Seconds a drop stays collectable before its message is removed.
pub const DROP_LIFETIME_SECS: i64 = 30 * 60;

const BASKET: &str = "🧺";
const DROPPED: &str = "⬇️";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Chance(#[from] ChanceError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiftOutcome {
    Given { item_code: String, recipient_total: i64 },
    Insufficient,
    NotUsable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickupOutcome {
    Collected { item_code: String, total: i64 },
    Broke { item_code: String },
    /// Nothing to pick up: unknown message or somebody was faster.
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedropOutcome {
    Dropped(MessageHandle),
    Insufficient,
    NotUsable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegendaryEggOutcome {
    Hit {
        target: String,
        backfired: bool,
        target_total: i64,
    },
    NoEgg,
}

struct DroppedItem {
    item_code: String,
    expires_at: i64,
}

pub struct EconomyActions {
    guard: ResourceGuard,
    chance: Arc<dyn ChanceSource>,
    channels: Arc<dyn ChannelSink>,
    temporary_messages: Arc<TemporaryMessages>,
    drop_lifetime_secs: i64,
    /// Dropped item messages that can still be collected.
    dropped: Mutex<HashMap<MessageHandle, DroppedItem>>,
}

impl EconomyActions {
    pub fn new(
        guard: ResourceGuard,
        chance: Arc<dyn ChanceSource>,
        channels: Arc<dyn ChannelSink>,
        temporary_messages: Arc<TemporaryMessages>,
    ) -> Self {
        Self {
            guard,
            chance,
            channels,
            temporary_messages,
            drop_lifetime_secs: DROP_LIFETIME_SECS,
            dropped: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_drop_lifetime(mut self, secs: i64) -> Self {
        self.drop_lifetime_secs = secs;
        self
    }

    fn dropped(&self) -> MutexGuard<'_, HashMap<MessageHandle, DroppedItem>> {
        match self.dropped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Gift `quantity` of an item, paid for with one empty gift box.
    pub async fn give(
        &self,
        giver: &str,
        recipient: &str,
        item_input: &str,
        quantity: i64,
    ) -> Result<GiftOutcome, ActionError> {
        let item_code = codes::interpret(item_input);
        if !codes::is_usable(&item_code) {
            return Ok(GiftOutcome::NotUsable(item_code));
        }

        let consume = ItemManifest::new()
            .with(EMPTY_GIFTBOX, 1)
            .with(item_code.as_str(), quantity);
        let grant = ItemManifest::single(item_code.as_str(), quantity);
        let reason = format!("Gifted by {}", giver);

        match self
            .guard
            .transfer_or_nothing(giver, &consume, recipient, &grant, &reason)
            .await?
        {
            TransferOutcome::Completed { granted } => {
                let recipient_total = granted
                    .iter()
                    .find(|(code, _)| *code == item_code)
                    .map(|(_, total)| *total)
                    .unwrap_or(quantity);
                let text = format!("{} gave {} {}x{}.", giver, recipient, item_code, quantity);
                channels::notify(self.channels.as_ref(), ChannelCode::Talk, &text).await;
                info!("{}", text);
                Ok(GiftOutcome::Given {
                    item_code,
                    recipient_total,
                })
            }
            TransferOutcome::Insufficient => {
                debug!("{} cannot afford to gift {} x{}", giver, item_code, quantity);
                Ok(GiftOutcome::Insufficient)
            }
        }
    }

    /// Post a collectable message for one unit of `item_code`.
    ///
    /// The message is registered as temporary, so uncollected drops are
    /// removed from the channel once they expire.
    pub async fn drop_item(&self, item_code: &str) -> Result<MessageHandle, ActionError> {
        let now = chrono::Utc::now().timestamp();
        let handle = self
            .channels
            .send(ChannelCode::Talk, &format!("{} dropped", item_code))
            .await?;
        channels::react_or_warn(self.channels.as_ref(), &handle, BASKET).await;
        channels::react_or_warn(self.channels.as_ref(), &handle, DROPPED).await;

        {
            let mut dropped = self.dropped();
            dropped.retain(|_, d| d.expires_at > now);
            dropped.insert(
                handle,
                DroppedItem {
                    item_code: item_code.to_string(),
                    expires_at: now + self.drop_lifetime_secs,
                },
            );
        }
        self.temporary_messages
            .add(handle, self.drop_lifetime_secs, now)
            .await;
        Ok(handle)
    }

    /// Collect a dropped item. Each drop can be collected once, before it expires.
    pub async fn pickup(&self, user_id: &str, drop: &MessageHandle) -> Result<PickupOutcome, ActionError> {
        let now = chrono::Utc::now().timestamp();
        let Some(DroppedItem {
            item_code,
            expires_at,
        }) = self.dropped().remove(drop)
        else {
            return Ok(PickupOutcome::Gone);
        };
        if expires_at <= now {
            debug!("Drop {} expired before {} reached it", drop.id, user_id);
            return Ok(PickupOutcome::Gone);
        }

        if codes::is_egg(&item_code) && self.chance.bool(DROPPED_EGG_BREAK_CHANCE) {
            let text = format!("{} broke {}...", user_id, item_code);
            channels::edit_or_warn(self.channels.as_ref(), drop, &text).await;
            return Ok(PickupOutcome::Broke { item_code });
        }

        let total = match self
            .guard
            .add(user_id, &item_code, 1, "Picked up dropped item")
            .await
        {
            Ok(total) => total,
            Err(e) => {
                // Leave the drop collectable when the grant did not land.
                self.dropped().insert(
                    *drop,
                    DroppedItem {
                        item_code,
                        expires_at,
                    },
                );
                return Err(e.into());
            }
        };

        let text = format!("{} collected by {}, now has x{}.", item_code, user_id, total);
        channels::edit_or_warn(self.channels.as_ref(), drop, &text).await;
        let action_text = format!("{} picked up {} and now has {}.", user_id, item_code, total);
        channels::notify(self.channels.as_ref(), ChannelCode::Actions, &action_text).await;

        Ok(PickupOutcome::Collected { item_code, total })
    }

    /// Consume one of the user's items and drop it for someone else.
    pub async fn redrop(&self, user_id: &str, item_input: &str) -> Result<RedropOutcome, ActionError> {
        let item_code = codes::interpret(item_input);
        if !codes::is_usable(&item_code) {
            return Ok(RedropOutcome::NotUsable(item_code));
        }
        if !self.guard.use_item(user_id, &item_code, 1, "Via redropping").await? {
            return Ok(RedropOutcome::Insufficient);
        }

        let text = format!("{} dropped {}", user_id, item_code);
        channels::notify(self.channels.as_ref(), ChannelCode::Talk, &text).await;
        let handle = self.drop_item(&item_code).await?;
        Ok(RedropOutcome::Dropped(handle))
    }

    /// Throw a legendary egg at `target_id`. A quarter of throws land on the thrower.
    pub async fn use_legendary_egg(
        &self,
        user_id: &str,
        target_id: &str,
    ) -> Result<LegendaryEggOutcome, ActionError> {
        if !self
            .guard
            .use_item(user_id, LEGENDARY_EGG, 1, "Used legendary egg")
            .await?
        {
            return Ok(LegendaryEggOutcome::NoEgg);
        }

        let backfired = self.chance.bool(LEGENDARY_BACKFIRE_CHANCE);
        let target = if backfired { user_id } else { target_id };
        let target_total = self
            .guard
            .add(target, COOP_POINT, LEGENDARY_EGG_POINTS, "Legendary egg effect")
            .await?;

        let action = if backfired {
            format!(
                "{} tried to use a legendary egg on {}, but it backfired",
                user_id, target_id
            )
        } else {
            format!("{} used a legendary egg on {}", user_id, target_id)
        };
        let text = format!("{}: {} points ({}).", action, LEGENDARY_EGG_POINTS, target_total);
        channels::notify(self.channels.as_ref(), ChannelCode::Actions, &text).await;
        channels::notify(self.channels.as_ref(), ChannelCode::Talk, &text).await;

        Ok(LegendaryEggOutcome::Hit {
            target: target.to_string(),
            backfired,
            target_total,
        })
    }
}
