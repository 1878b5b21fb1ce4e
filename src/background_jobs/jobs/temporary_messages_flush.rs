//! Removes temporary messages whose lifetime ran out.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct TemporaryMessagesFlushJob {
    period: Duration,
}

impl TemporaryMessagesFlushJob {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[async_trait]
impl BackgroundJob for TemporaryMessagesFlushJob {
    fn name(&self) -> &str {
        "temporary_messages_flush"
    }

    fn description(&self) -> &str {
        "Delete expired event messages"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.period)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let deleted = ctx
            .temporary_messages
            .flush(ctx.channels.as_ref(), ctx.unix_now())
            .await;
        if deleted > 0 {
            info!("Deleted {} expired temporary messages", deleted);
        } else {
            debug!("No temporary messages expired");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chance::ScriptedChance;
    use crate::channels::{ChannelCode, ChannelSink, RecordingChannelSink};
    use crate::items::{ResourceGuard, DROP_LIFETIME_SECS};
    use crate::ledger::MemoryLedgerStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_flush_deletes_only_expired_messages() {
        let store = Arc::new(MemoryLedgerStore::new());
        let sink = Arc::new(RecordingChannelSink::new());
        let ctx = JobContext::new(
            CancellationToken::new(),
            ResourceGuard::new(store.clone()),
            store,
            sink.clone(),
            Arc::new(ScriptedChance::new()),
        );
        let now = ctx.unix_now();
        let old = sink.send(ChannelCode::Talk, "old drop").await.unwrap();
        let fresh = sink.send(ChannelCode::Talk, "fresh drop").await.unwrap();
        ctx.temporary_messages.add(old, 60, now - 120).await;
        ctx.temporary_messages.add(fresh, 600, now).await;

        TemporaryMessagesFlushJob::new(Duration::from_secs(60))
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(sink.texts(ChannelCode::Talk), vec!["fresh drop".to_string()]);
        assert_eq!(ctx.temporary_messages.len().await, 1);
    }

    #[tokio::test]
    async fn test_item_drops_share_the_context_registry() {
        let store = Arc::new(MemoryLedgerStore::new());
        let sink = Arc::new(RecordingChannelSink::new());
        let ctx = JobContext::new(
            CancellationToken::new(),
            ResourceGuard::new(store.clone()),
            store,
            sink.clone(),
            Arc::new(ScriptedChance::new()),
        );

        let drop = ctx.actions.drop_item("AXE").await.unwrap();

        assert_eq!(ctx.temporary_messages.len().await, 1);
        let later = ctx.unix_now() + DROP_LIFETIME_SECS;
        assert_eq!(ctx.temporary_messages.flush(sink.as_ref(), later).await, 1);
        assert!(sink.get(&drop).unwrap().deleted);
    }
}
