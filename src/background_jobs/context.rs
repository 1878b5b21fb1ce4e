use crate::chance::ChanceSource;
use crate::channels::{ChannelSink, TemporaryMessages};
use crate::items::{EconomyActions, ResourceGuard};
use crate::ledger::StateStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Built once at startup and cloned into every run, so jobs reach shared
/// services through it rather than through globals.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for process shutdown. Stopping the scheduler does not
    /// cancel it.
    pub cancellation_token: CancellationToken,

    /// Every ledger mutation goes through the guard.
    pub guard: ResourceGuard,

    /// Small persistent counters and markers.
    pub state: Arc<dyn StateStore>,

    pub channels: Arc<dyn ChannelSink>,

    pub chance: Arc<dyn ChanceSource>,

    pub temporary_messages: Arc<TemporaryMessages>,

    pub actions: Arc<EconomyActions>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        guard: ResourceGuard,
        state: Arc<dyn StateStore>,
        channels: Arc<dyn ChannelSink>,
        chance: Arc<dyn ChanceSource>,
    ) -> Self {
        let temporary_messages = Arc::new(TemporaryMessages::new());
        let actions = Arc::new(EconomyActions::new(
            guard.clone(),
            Arc::clone(&chance),
            Arc::clone(&channels),
            Arc::clone(&temporary_messages),
        ));
        Self {
            cancellation_token,
            guard,
            state,
            channels,
            chance,
            temporary_messages,
            actions,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Wall-clock unix seconds.
    pub fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
