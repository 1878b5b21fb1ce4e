use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::channels::ChannelCode;
use crate::items::GuardError;
use crate::ledger::{self, TransactionRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const CURRENT_DAY_KEY: &str = "current_day";
const DAY_SECS: i64 = 24 * 60 * 60;

/// Announces a new day with a summary of what was handed out in the last 24 hours.
pub struct NewDayJob {
    base_tick: Duration,
}

impl NewDayJob {
    pub fn new(base_tick: Duration) -> Self {
        Self { base_tick }
    }
}

/// Total granted per item code, ignoring consumption.
fn granted_per_item(records: &[TransactionRecord]) -> BTreeMap<&str, i64> {
    let mut totals = BTreeMap::new();
    for record in records.iter().filter(|r| r.delta > 0) {
        *totals.entry(record.item_code.as_str()).or_insert(0) += record.delta;
    }
    totals
}

fn summary_text(totals: &BTreeMap<&str, i64>) -> String {
    if totals.is_empty() {
        return "A new day begins. Nothing was handed out yesterday.".to_string();
    }
    let lines: Vec<String> = totals
        .iter()
        .map(|(code, total)| format!("{}: {}", code, total))
        .collect();
    format!("A new day begins. Yesterday the coop collected:\n{}", lines.join("\n"))
}

#[async_trait]
impl BackgroundJob for NewDayJob {
    fn name(&self) -> &str {
        "new_day"
    }

    fn description(&self) -> &str {
        "Post a daily summary when a new day starts"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.base_tick / 2)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let now = ctx.unix_now();
        let previous = ledger::run_blocking(&ctx.state, |s| s.get_state(CURRENT_DAY_KEY))
            .await
            .map_err(GuardError::from)?;
        let previous_day = previous.as_deref().and_then(|v| v.parse::<i64>().ok());

        if let Some(day) = previous_day {
            if now < day + DAY_SECS {
                debug!("Day started at {} is still running", day);
                return Ok(());
            }
        }

        // Only the run whose swap still sees the value read above owns the new day.
        let swapped = ledger::run_blocking(&ctx.state, move |s| {
            s.swap_state(CURRENT_DAY_KEY, &now.to_string())
        })
        .await
        .map_err(GuardError::from)?;
        if swapped != previous {
            debug!("New day already claimed by another run");
            return Ok(());
        }

        let records = ctx.guard.transactions_since(now - DAY_SECS).await?;
        let totals = granted_per_item(&records);
        ctx.channels
            .send(ChannelCode::Talk, &summary_text(&totals))
            .await?;
        info!("New day started at {} ({} item codes summarised)", now, totals.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chance::ScriptedChance;
    use crate::channels::RecordingChannelSink;
    use crate::items::ResourceGuard;
    use crate::ledger::{MemoryLedgerStore, StateStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context(store: &Arc<MemoryLedgerStore>, sink: &Arc<RecordingChannelSink>) -> JobContext {
        JobContext::new(
            CancellationToken::new(),
            ResourceGuard::new(store.clone()),
            store.clone(),
            sink.clone(),
            Arc::new(ScriptedChance::new()),
        )
    }

    #[test]
    fn test_summary_counts_only_grants() {
        let records = vec![
            TransactionRecord::now("alice", "WOOD", 3, "Chop"),
            TransactionRecord::now("bob", "WOOD", 2, "Chop"),
            TransactionRecord::now("alice", "WOOD", -4, "Craft"),
            TransactionRecord::now("bob", "AXE", -1, "Broke"),
        ];
        let totals = granted_per_item(&records);
        assert_eq!(totals.get("WOOD"), Some(&5));
        assert_eq!(totals.get("AXE"), None);
    }

    #[tokio::test]
    async fn test_first_run_starts_a_day_and_posts_summary() {
        let store = Arc::new(MemoryLedgerStore::new());
        let sink = Arc::new(RecordingChannelSink::new());
        let ctx = context(&store, &sink);
        ctx.guard.add("alice", "WOOD", 7, "Chop").await.unwrap();

        NewDayJob::new(Duration::from_secs(60)).execute(&ctx).await.unwrap();

        let talk = sink.texts(ChannelCode::Talk);
        assert_eq!(talk.len(), 1);
        assert!(talk[0].contains("WOOD: 7"));
        assert!(store.get_state(CURRENT_DAY_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_same_day_posts_nothing() {
        let store = Arc::new(MemoryLedgerStore::new());
        let sink = Arc::new(RecordingChannelSink::new());
        let ctx = context(&store, &sink);
        let job = NewDayJob::new(Duration::from_secs(60));

        job.execute(&ctx).await.unwrap();
        job.execute(&ctx).await.unwrap();

        assert_eq!(sink.texts(ChannelCode::Talk).len(), 1);
    }

    #[tokio::test]
    async fn test_day_rolls_over_after_24_hours() {
        let store = Arc::new(MemoryLedgerStore::new());
        let sink = Arc::new(RecordingChannelSink::new());
        let ctx = context(&store, &sink);
        let yesterday = ctx.unix_now() - DAY_SECS - 5;
        store
            .set_state(CURRENT_DAY_KEY, &yesterday.to_string())
            .unwrap();

        NewDayJob::new(Duration::from_secs(60)).execute(&ctx).await.unwrap();

        let talk = sink.texts(ChannelCode::Talk);
        assert_eq!(talk, vec!["A new day begins. Nothing was handed out yesterday.".to_string()]);
        let stored: i64 = store
            .get_state(CURRENT_DAY_KEY)
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        assert!(stored > yesterday);
    }
}
