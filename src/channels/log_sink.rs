use super::{ChannelCode, ChannelError, ChannelSink, MessageHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Sink that writes every message to the tracing log.
///
/// Used by the binary when no chat platform is attached.
#[derive(Default)]
pub struct LogChannelSink {
    next_id: AtomicU64,
}

impl LogChannelSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelSink for LogChannelSink {
    async fn send(&self, channel: ChannelCode, text: &str) -> Result<MessageHandle, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(target: "channel", "[{}#{}] {}", channel, id, text);
        Ok(MessageHandle { channel, id })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        info!(target: "channel", "[{}#{} edited] {}", handle.channel, handle.id, text);
        Ok(())
    }

    async fn react(&self, handle: &MessageHandle, emoji: &str) -> Result<(), ChannelError> {
        info!(target: "channel", "[{}#{} react] {}", handle.channel, handle.id, emoji);
        Ok(())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        info!(target: "channel", "[{}#{} deleted]", handle.channel, handle.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_unique() {
        let sink = LogChannelSink::new();
        let a = sink.send(ChannelCode::Talk, "a").await.unwrap();
        let b = sink.send(ChannelCode::Actions, "b").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.channel, ChannelCode::Actions);
    }
}
