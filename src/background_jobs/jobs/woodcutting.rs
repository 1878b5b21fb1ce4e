//! Woodcutting minigame.
//!
//! The job drops a stack of wood sized by chance and community velocity.
//! Members chop it with an axe for wood, points and the odd egg; axes
//! sometimes break.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JitterResolution, JobError, JobSchedule},
};
use crate::channels::{self, ChannelCode, MessageHandle};
use crate::items::codes::{AVERAGE_EGG, AXE, COOP_POINT, LEGENDARY_EGG, RARE_EGG, WOOD};
use crate::items::ActionError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

const WOOD_EMOJI: &str = "🪵";
const UPDATES_HEADER: &str = "🪓 **WOODCUTTING IN PROGRESS** 🪓";

/// How long a dropped stack stays up, in seconds.
const STACK_LIFETIME_SECS: i64 = 30 * 60;

const MISS_CHANCE: f64 = 50.0;
const AXE_BREAK_CHANCE: f64 = 15.0;
const AXE_BREAK_DAMAGE: i64 = 2;
const POINTS_PER_CHOP: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChopOutcome {
    Missed,
    NoAxe,
    /// The stack is gone (fully chopped or expired).
    Gone,
    AxeBroke {
        axes_left: i64,
        points_total: i64,
    },
    Chopped {
        wood: i64,
        wood_total: i64,
        points_total: i64,
        /// Rare finds as (item code, quantity).
        finds: Vec<(String, i64)>,
    },
}

struct WoodStack {
    remaining: i64,
    updates: MessageHandle,
    /// username -> (wood, points) gathered from this stack.
    tally: BTreeMap<String, (i64, i64)>,
    expires_at: i64,
}

pub struct WoodcuttingJob {
    base_tick: Duration,
    community_velocity: i64,
    stacks: Mutex<HashMap<MessageHandle, WoodStack>>,
}

impl WoodcuttingJob {
    pub fn new(base_tick: Duration, community_velocity: i64) -> Self {
        Self {
            base_tick,
            community_velocity: community_velocity.max(1),
            stacks: Mutex::new(HashMap::new()),
        }
    }

    fn stacks(&self) -> MutexGuard<'_, HashMap<MessageHandle, WoodStack>> {
        match self.stacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wood left in the stack, `None` when it is gone.
    pub fn remaining(&self, stack: &MessageHandle) -> Option<i64> {
        self.stacks().get(stack).map(|s| s.remaining)
    }

    /// Roll the size of a new stack.
    fn roll_stack_size(&self, ctx: &JobContext) -> Result<i64, JobError> {
        let base = self.community_velocity;
        let mut size = ctx.chance.natural(base, base * 5)?;
        if ctx.chance.bool(5.0) {
            size = ctx.chance.natural(base * 5, base * 20)?;
        }
        if ctx.chance.bool(1.0) {
            size = ctx.chance.natural(base * 7, base * 35)?;
        }
        Ok(size)
    }

    /// Chop once at `stack` on behalf of `user_id`.
    pub async fn chop(
        &self,
        ctx: &JobContext,
        user_id: &str,
        stack: &MessageHandle,
    ) -> Result<ChopOutcome, ActionError> {
        if ctx.chance.bool(MISS_CHANCE) {
            return Ok(ChopOutcome::Missed);
        }

        let Some(magnitude) = self.remaining(stack) else {
            return Ok(ChopOutcome::Gone);
        };
        let reward = ctx.chance.natural(1, magnitude * 4)?;

        if ctx.guard.quantity(user_id, AXE).await? <= 0 {
            return Ok(ChopOutcome::NoAxe);
        }

        let extracted = extracted_wood(reward);

        if ctx.chance.bool(AXE_BREAK_CHANCE) {
            if !ctx.guard.use_item(user_id, AXE, 1, "Broken axe").await? {
                return Ok(ChopOutcome::NoAxe);
            }
            let points_total = ctx
                .guard
                .subtract(user_id, COOP_POINT, AXE_BREAK_DAMAGE, "Broken axe damage")
                .await?;
            let axes_left = ctx.guard.quantity(user_id, AXE).await?;
            debug!("{} broke an axe, {} left", user_id, axes_left);
            return Ok(ChopOutcome::AxeBroke {
                axes_left,
                points_total,
            });
        }

        let wood_total = ctx.guard.add(user_id, WOOD, extracted, "Woodcutting").await?;
        let points_total = ctx
            .guard
            .add(user_id, COOP_POINT, POINTS_PER_CHOP, "Woodcutting")
            .await?;
        let finds = self.roll_finds(ctx, user_id).await?;

        self.shrink_stack(ctx, user_id, stack, extracted).await;

        Ok(ChopOutcome::Chopped {
            wood: extracted,
            wood_total,
            points_total,
            finds,
        })
    }

    async fn roll_finds(&self, ctx: &JobContext, user_id: &str) -> Result<Vec<(String, i64)>, ActionError> {
        let mut finds = Vec::new();

        if ctx.chance.bool(3.33) {
            let total = ctx
                .guard
                .add(user_id, AVERAGE_EGG, 1, "Woodcutting uncommon event")
                .await?;
            let text = format!(
                "{} catches an average egg as it falls from a tree! ({})",
                user_id, total
            );
            channels::notify(ctx.channels.as_ref(), ChannelCode::Actions, &text).await;
            finds.push((AVERAGE_EGG.to_string(), 1));
        }

        if ctx.chance.bool(0.25) {
            let qty = ctx.chance.natural(5, 25)?;
            ctx.guard
                .add(user_id, RARE_EGG, qty, "Woodcutting rare event")
                .await?;
            let text = format!(
                "{} triggered a chain branch reaction, {} rare eggs found!",
                user_id, qty
            );
            channels::notify(ctx.channels.as_ref(), ChannelCode::Actions, &text).await;
            finds.push((RARE_EGG.to_string(), qty));
        }

        if ctx.chance.bool(0.0525) {
            let qty = ctx.chance.natural(2, 4)?;
            ctx.guard
                .add(user_id, LEGENDARY_EGG, qty, "Woodcutting very rare event")
                .await?;
            let text = format!(
                "{} hit a lucky branch, {} legendary egg(s) found!",
                user_id, qty
            );
            channels::notify(ctx.channels.as_ref(), ChannelCode::Talk, &text).await;
            finds.push((LEGENDARY_EGG.to_string(), qty));
        }

        Ok(finds)
    }

    /// Take one piece off the stack and refresh its messages.
    async fn shrink_stack(&self, ctx: &JobContext, user_id: &str, stack: &MessageHandle, wood: i64) {
        let (remaining, updates, updates_text) = {
            let mut stacks = self.stacks();
            let Some(entry) = stacks.get_mut(stack) else {
                return;
            };
            entry.remaining -= 1;
            let tally = entry.tally.entry(user_id.to_string()).or_insert((0, 0));
            tally.0 += wood;
            tally.1 += POINTS_PER_CHOP;

            let remaining = entry.remaining;
            let updates = entry.updates;
            let updates_text = tally_text(&entry.tally);
            if remaining <= 0 {
                stacks.remove(stack);
            }
            (remaining, updates, updates_text)
        };

        if remaining > 0 {
            channels::edit_or_warn(ctx.channels.as_ref(), stack, &wood_text(remaining)).await;
        } else if let Err(e) = ctx.channels.delete(stack).await {
            debug!("Chopped-out stack {} already gone: {}", stack.id, e);
        }
        channels::edit_or_warn(ctx.channels.as_ref(), &updates, &updates_text).await;
    }
}

/// Wood extracted from a chop roll: `ceil(reward / 1.25)`.
fn extracted_wood(reward: i64) -> i64 {
    (reward * 4 + 4) / 5
}

fn wood_text(size: i64) -> String {
    WOOD_EMOJI.repeat(size.max(0) as usize)
}

fn tally_text(tally: &BTreeMap<String, (i64, i64)>) -> String {
    let mut lines = vec![UPDATES_HEADER.to_string()];
    lines.extend(
        tally
            .iter()
            .map(|(user, (wood, points))| format!("{} +{}{} +{} points", user, wood, WOOD_EMOJI, points)),
    );
    lines.join("\n")
}

#[async_trait]
impl BackgroundJob for WoodcuttingJob {
    fn name(&self) -> &str {
        "woodcutting"
    }

    fn description(&self) -> &str {
        "Drop a stack of wood for members to chop"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.base_tick).with_jitter(1.0, 5.0, JitterResolution::OnRegistration)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let now = ctx.unix_now();
        self.stacks().retain(|_, s| s.expires_at > now);

        let size = self.roll_stack_size(ctx)?;
        let updates = ctx.channels.send(ChannelCode::Talk, UPDATES_HEADER).await?;
        let stack = ctx.channels.send(ChannelCode::Talk, &wood_text(size)).await?;

        ctx.temporary_messages
            .add(updates, STACK_LIFETIME_SECS, now)
            .await;
        ctx.temporary_messages
            .add(stack, STACK_LIFETIME_SECS, now)
            .await;

        self.stacks().insert(
            stack,
            WoodStack {
                remaining: size,
                updates,
                tally: BTreeMap::new(),
                expires_at: now + STACK_LIFETIME_SECS,
            },
        );

        info!("Dropped a stack of {} wood", size);
        Ok(())
    }
}
