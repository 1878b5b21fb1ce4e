use super::{ChannelCode, ChannelError, ChannelSink, MessageHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A message as the recording sink last saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub handle: MessageHandle,
    pub text: String,
    pub reactions: Vec<String>,
    pub deleted: bool,
}

/// In-memory sink that keeps every message for later inspection.
#[derive(Default)]
pub struct RecordingChannelSink {
    messages: Mutex<Vec<RecordedMessage>>,
    failing: AtomicBool,
}

impl RecordingChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.lock().clone()
    }

    /// Text of live (not deleted) messages in `channel`, oldest first.
    pub fn texts(&self, channel: ChannelCode) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|m| m.handle.channel == channel && !m.deleted)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn get(&self, handle: &MessageHandle) -> Option<RecordedMessage> {
        self.lock().iter().find(|m| m.handle == *handle).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedMessage>> {
        match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_available(&self, channel: ChannelCode) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable {
                channel,
                reason: "sink set to fail".to_string(),
            });
        }
        Ok(())
    }

    fn with_message<T>(
        &self,
        handle: &MessageHandle,
        f: impl FnOnce(&mut RecordedMessage) -> T,
    ) -> Result<T, ChannelError> {
        self.check_available(handle.channel)?;
        let mut messages = self.lock();
        messages
            .iter_mut()
            .find(|m| m.handle == *handle && !m.deleted)
            .map(f)
            .ok_or(ChannelError::MessageNotFound(handle.id))
    }
}

#[async_trait]
impl ChannelSink for RecordingChannelSink {
    async fn send(&self, channel: ChannelCode, text: &str) -> Result<MessageHandle, ChannelError> {
        self.check_available(channel)?;
        let mut messages = self.lock();
        let handle = MessageHandle {
            channel,
            id: messages.len() as u64 + 1,
        };
        messages.push(RecordedMessage {
            handle,
            text: text.to_string(),
            reactions: Vec::new(),
            deleted: false,
        });
        Ok(handle)
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        self.with_message(handle, |m| m.text = text.to_string())
    }

    async fn react(&self, handle: &MessageHandle, emoji: &str) -> Result<(), ChannelError> {
        self.with_message(handle, |m| m.reactions.push(emoji.to_string()))
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.with_message(handle, |m| m.deleted = true)
    }
}
