//! Fox hunt minigame.
//!
//! A fox with a handful of hearts shows up in the talk channel. Every pet or
//! slap costs it a heart. Slaps may stun it, it may bite back, and a lucky pet
//! hands over whatever eggs the fox has stolen.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JitterResolution, JobError, JobSchedule},
};
use crate::channels::{self, ChannelCode, MessageHandle};
use crate::items::codes::{self, COOP_POINT, STOLEN_EGGS};
use crate::items::{ActionError, GuardError};
use crate::ledger;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

const FOX: &str = "🦊";
const FULL_HEART: &str = "❤️";
const HALF_HEART: &str = "💔";
const STUN_SPARKLES: &str = "✨💫";

const FOX_LIFETIME_SECS: i64 = 30 * 60;
const STUN_DURATION: Duration = Duration::from_secs(8);

const STUN_CHANCE: f64 = 70.0;
const BITE_CHANCE: f64 = 50.0;
const REWARD_CHANCE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoxAction {
    Pet,
    Slap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoxOutcome {
    /// No such fox, or it already left.
    Gone,
    /// The fox is stunned and ignores everyone.
    StillStunned,
    /// No hearts left.
    Sleeping,
    StunnedFox,
    Bitten { points_total: i64 },
    /// Stolen eggs handed over, as (item code, quantity). May be empty.
    Rewarded { eggs: Vec<(String, i64)> },
    Dodged,
    SatNextTo,
}

struct Fox {
    full_hearts: u32,
    half_hearts: u32,
    stunned_until: Option<Instant>,
    expires_at: i64,
}

impl Fox {
    fn text(&self) -> String {
        format!(
            "{}{}{}",
            FOX,
            FULL_HEART.repeat(self.full_hearts as usize),
            HALF_HEART.repeat(self.half_hearts as usize)
        )
    }
}

/// What happened when trying to take a heart.
enum HeartCheck {
    Gone,
    Stunned,
    Sleeping,
    Consumed(String),
}

pub struct FoxHuntJob {
    base_tick: Duration,
    foxes: Arc<Mutex<HashMap<MessageHandle, Fox>>>,
}

impl FoxHuntJob {
    pub fn new(base_tick: Duration) -> Self {
        Self {
            base_tick,
            foxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn foxes(&self) -> MutexGuard<'_, HashMap<MessageHandle, Fox>> {
        lock_foxes(&self.foxes)
    }

    /// Hearts the fox has left, `None` when it is gone.
    pub fn hearts(&self, fox: &MessageHandle) -> Option<u32> {
        self.foxes().get(fox).map(|f| f.full_hearts)
    }

    fn take_heart(&self, fox: &MessageHandle, now: Instant) -> HeartCheck {
        let mut foxes = self.foxes();
        let Some(entry) = foxes.get_mut(fox) else {
            return HeartCheck::Gone;
        };
        if entry.stunned_until.is_some_and(|until| until > now) {
            return HeartCheck::Stunned;
        }
        if entry.full_hearts == 0 {
            return HeartCheck::Sleeping;
        }
        entry.full_hearts -= 1;
        entry.half_hearts += 1;
        HeartCheck::Consumed(entry.text())
    }

    /// Pet or slap the fox posted as `fox`.
    pub async fn interact(
        &self,
        ctx: &JobContext,
        user_id: &str,
        fox: &MessageHandle,
        action: FoxAction,
    ) -> Result<FoxOutcome, ActionError> {
        let now = Instant::now();
        let fox_text = match self.take_heart(fox, now) {
            HeartCheck::Gone => return Ok(FoxOutcome::Gone),
            HeartCheck::Stunned => return Ok(FoxOutcome::StillStunned),
            HeartCheck::Sleeping => return Ok(FoxOutcome::Sleeping),
            HeartCheck::Consumed(text) => text,
        };
        channels::edit_or_warn(ctx.channels.as_ref(), fox, &fox_text).await;

        if action == FoxAction::Slap && ctx.chance.bool(STUN_CHANCE) {
            self.stun(ctx, fox, fox_text, now).await;
            return Ok(FoxOutcome::StunnedFox);
        }

        if ctx.chance.bool(BITE_CHANCE) {
            let points_total = ctx
                .guard
                .subtract(user_id, COOP_POINT, 1, "Fox bite")
                .await?;
            return Ok(FoxOutcome::Bitten { points_total });
        }

        if action == FoxAction::Pet && ctx.chance.bool(REWARD_CHANCE) {
            let eggs = self.reward(ctx, user_id).await?;
            return Ok(FoxOutcome::Rewarded { eggs });
        }

        Ok(match action {
            FoxAction::Slap => FoxOutcome::Dodged,
            FoxAction::Pet => FoxOutcome::SatNextTo,
        })
    }

    async fn stun(&self, ctx: &JobContext, fox: &MessageHandle, fox_text: String, now: Instant) {
        if let Some(entry) = self.foxes().get_mut(fox) {
            entry.stunned_until = Some(now + STUN_DURATION);
        }
        let stunned_text = format!("{}{}", STUN_SPARKLES, fox_text);
        channels::edit_or_warn(ctx.channels.as_ref(), fox, &stunned_text).await;

        let sink = Arc::clone(&ctx.channels);
        let foxes = Arc::clone(&self.foxes);
        let fox = *fox;
        tokio::spawn(async move {
            tokio::time::sleep(STUN_DURATION).await;
            let text = lock_foxes(&foxes).get(&fox).map(Fox::text);
            if let Some(text) = text {
                channels::edit_or_warn(sink.as_ref(), &fox, &text).await;
            }
        });
    }

    /// Hand every stolen egg counter to `user_id`.
    ///
    /// Each counter is swapped to zero before granting, so concurrent pets
    /// cannot both collect the same eggs.
    async fn reward(&self, ctx: &JobContext, user_id: &str) -> Result<Vec<(String, i64)>, ActionError> {
        let mut eggs = Vec::new();
        for egg in STOLEN_EGGS {
            let key = codes::stolen_key(egg);
            let swap_key = key.clone();
            let previous = ledger::run_blocking(&ctx.state, move |s| s.swap_state(&swap_key, "0"))
                .await
                .map_err(GuardError::from)?;
            let count = previous
                .as_deref()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0);
            if count <= 0 {
                continue;
            }

            let reason = format!("Fox hunt reward {}", egg);
            if let Err(e) = ctx.guard.add(user_id, egg, count, &reason).await {
                error!("Failed to grant {} stolen {} to {}: {}", count, egg, user_id, e);
                let restore_key = key.clone();
                let restored = ledger::run_blocking(&ctx.state, move |s| {
                    s.set_state(&restore_key, &count.to_string())
                })
                .await;
                if let Err(restore) = restored {
                    error!("Failed to restore {}: {}", key, restore);
                }
                return Err(e.into());
            }
            eggs.push((egg.to_string(), count));
        }

        let text = if eggs.is_empty() {
            format!("The fox is feeling generous towards {}!", user_id)
        } else {
            let list: Vec<String> = eggs.iter().map(|(c, n)| format!("{}: {}", c, n)).collect();
            format!("The fox brings {} gifts...\n{}", user_id, list.join("\n"))
        };
        channels::notify(ctx.channels.as_ref(), ChannelCode::Actions, &text).await;
        Ok(eggs)
    }
}

fn lock_foxes(foxes: &Mutex<HashMap<MessageHandle, Fox>>) -> MutexGuard<'_, HashMap<MessageHandle, Fox>> {
    match foxes.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl BackgroundJob for FoxHuntJob {
    fn name(&self) -> &str {
        "foxhunt"
    }

    fn description(&self) -> &str {
        "Post a fox members can pet or slap"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.base_tick).with_jitter(3.0, 9.0, JitterResolution::OnRegistration)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let now = ctx.unix_now();
        self.foxes().retain(|_, f| f.expires_at > now);

        let hearts = ctx.chance.natural(3, 12)? as u32;
        let fox = Fox {
            full_hearts: hearts,
            half_hearts: 0,
            stunned_until: None,
            expires_at: now + FOX_LIFETIME_SECS,
        };
        let handle = ctx.channels.send(ChannelCode::Talk, &fox.text()).await?;
        ctx.temporary_messages
            .add(handle, FOX_LIFETIME_SECS, now)
            .await;
        self.foxes().insert(handle, fox);

        info!("Fox with {} hearts posted", hearts);
        debug!("Fox message id {}", handle.id);
        Ok(())
    }
}
