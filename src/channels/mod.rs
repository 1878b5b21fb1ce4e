//! Outbound message channels.
//!
//! Jobs and actions report outcomes through a [`ChannelSink`]. The sink is a
//! side-effecting collaborator: nothing in the core reads back from it, and a
//! failed send never undoes a ledger change.

mod log_sink;
mod recording_sink;
mod temporary;

pub use log_sink::LogChannelSink;
pub use recording_sink::{RecordedMessage, RecordingChannelSink};
pub use temporary::TemporaryMessages;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Logical destination for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelCode {
    /// General chatter and event announcements.
    Talk,
    /// Record of item actions.
    Actions,
    /// Job faults.
    Errors,
}

impl std::fmt::Display for ChannelCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelCode::Talk => write!(f, "TALK"),
            ChannelCode::Actions => write!(f, "ACTIONS"),
            ChannelCode::Errors => write!(f, "ERRORS"),
        }
    }
}

/// Reference to a message previously sent through a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel: ChannelCode,
    pub id: u64,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Message {0} not found")]
    MessageNotFound(u64),

    #[error("Channel {channel} unavailable: {reason}")]
    Unavailable { channel: ChannelCode, reason: String },
}

#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, channel: ChannelCode, text: &str) -> Result<MessageHandle, ChannelError>;

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError>;

    async fn react(&self, handle: &MessageHandle, emoji: &str) -> Result<(), ChannelError>;

    async fn delete(&self, handle: &MessageHandle) -> Result<(), ChannelError>;
}

/// Send and log on failure. Used where the message is informational only.
pub async fn notify(sink: &dyn ChannelSink, channel: ChannelCode, text: &str) -> Option<MessageHandle> {
    match sink.send(channel, text).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to send to {}: {}", channel, e);
            None
        }
    }
}

/// Edit and log on failure.
pub async fn edit_or_warn(sink: &dyn ChannelSink, handle: &MessageHandle, text: &str) {
    if let Err(e) = sink.edit(handle, text).await {
        warn!("Failed to edit message {}: {}", handle.id, e);
    }
}

/// React and log on failure.
pub async fn react_or_warn(sink: &dyn ChannelSink, handle: &MessageHandle, emoji: &str) {
    if let Err(e) = sink.react(handle, emoji).await {
        warn!("Failed to react to message {}: {}", handle.id, e);
    }
}
