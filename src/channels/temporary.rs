use super::{ChannelError, ChannelSink, MessageHandle};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct TemporaryMessage {
    handle: MessageHandle,
    /// Unix timestamp (seconds) after which the message should be removed.
    expires_at: i64,
}

/// Messages that should disappear after a lifetime, such as event drops
/// nobody collected.
#[derive(Default)]
pub struct TemporaryMessages {
    messages: Mutex<Vec<TemporaryMessage>>,
}

impl TemporaryMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, handle: MessageHandle, lifetime_secs: i64, now: i64) {
        self.messages.lock().await.push(TemporaryMessage {
            handle,
            expires_at: now + lifetime_secs,
        });
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }

    /// Delete every message that expired at or before `now`.
    ///
    /// Messages already gone from the channel are forgotten; other failures
    /// stay registered for the next flush. Returns the number deleted.
    pub async fn flush(&self, sink: &dyn ChannelSink, now: i64) -> usize {
        let expired: Vec<MessageHandle> = {
            let mut messages = self.messages.lock().await;
            let (expired, live): (Vec<_>, Vec<_>) =
                messages.drain(..).partition(|m| m.expires_at <= now);
            *messages = live;
            expired.into_iter().map(|m| m.handle).collect()
        };

        let mut deleted = 0;
        let mut retry = Vec::new();
        for handle in expired {
            match sink.delete(&handle).await {
                Ok(()) => deleted += 1,
                Err(ChannelError::MessageNotFound(id)) => {
                    debug!("Temporary message {} already gone", id);
                }
                Err(e) => {
                    warn!("Failed to delete temporary message {}: {}", handle.id, e);
                    retry.push(TemporaryMessage {
                        handle,
                        expires_at: now,
                    });
                }
            }
        }

        if !retry.is_empty() {
            self.messages.lock().await.extend(retry);
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelCode, RecordingChannelSink};

    #[tokio::test]
    async fn test_flush_deletes_only_expired() {
        let sink = RecordingChannelSink::new();
        let temporary = TemporaryMessages::new();

        let short = sink.send(ChannelCode::Talk, "short").await.unwrap();
        let long = sink.send(ChannelCode::Talk, "long").await.unwrap();
        temporary.add(short, 60, 1_000).await;
        temporary.add(long, 600, 1_000).await;

        assert_eq!(temporary.flush(&sink, 1_059).await, 0);
        assert_eq!(temporary.flush(&sink, 1_060).await, 1);
        assert_eq!(sink.texts(ChannelCode::Talk), vec!["long".to_string()]);
        assert_eq!(temporary.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_retried() {
        let sink = RecordingChannelSink::new();
        let temporary = TemporaryMessages::new();
        let handle = sink.send(ChannelCode::Talk, "drop").await.unwrap();
        temporary.add(handle, 10, 0).await;

        sink.set_failing(true);
        assert_eq!(temporary.flush(&sink, 100).await, 0);
        assert_eq!(temporary.len().await, 1);

        sink.set_failing(false);
        assert_eq!(temporary.flush(&sink, 101).await, 1);
        assert!(temporary.is_empty().await);
    }

    #[tokio::test]
    async fn test_already_deleted_is_forgotten() {
        let sink = RecordingChannelSink::new();
        let temporary = TemporaryMessages::new();
        let handle = sink.send(ChannelCode::Talk, "drop").await.unwrap();
        sink.delete(&handle).await.unwrap();
        temporary.add(handle, 0, 0).await;

        assert_eq!(temporary.flush(&sink, 0).await, 0);
        assert!(temporary.is_empty().await);
    }
}
