/// Transport channel abstraction
///
/// A channel is one open, message-framed connection to a single client. The relay
/// only ever needs three things from it: write a frame, read the next reply with a
/// deadline, and close.
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::messages::{is_ack, PushFrame};

/// Identity of a live channel, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("write failed: {0}")]
    Write(String),

    #[error("timed out waiting for acknowledgement")]
    Timeout,

    #[error("unexpected acknowledgement payload ({0} bytes)")]
    BadAck(usize),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

#[async_trait]
pub trait TransportChannel: Send {
    fn id(&self) -> ChannelId;

    async fn write_message(&mut self, frame: &str) -> Result<(), ChannelError>;

    /// Wait at most `timeout` for the next payload from the client
    async fn read_with_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError>;

    async fn close(&mut self);
}

/// Write `frame` and require the `received` acknowledgement within `timeout`
pub async fn send_and_await_ack(
    channel: &mut dyn TransportChannel,
    frame: &PushFrame,
    timeout: Duration,
) -> Result<(), ChannelError> {
    let encoded = frame
        .to_json()
        .map_err(|e| ChannelError::Encode(e.to_string()))?;

    channel.write_message(&encoded).await?;

    let reply = channel.read_with_timeout(timeout).await?;
    if is_ack(&reply) {
        Ok(())
    } else {
        Err(ChannelError::BadAck(reply.len()))
    }
}
