/// In-process transport channel with scripted client behaviour
///
/// Stands in for a connected client: every written frame is recorded, and the
/// reply to each frame is decided by the current `AckBehavior`. The paired
/// `MemoryProbe` observes the log and can change behaviour while the channel is
/// registered.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::channel::{ChannelError, ChannelId, TransportChannel};
use super::messages::ACK_PAYLOAD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckBehavior {
    /// Answer every frame with `received`
    Ack,
    /// Answer every frame with the given payload
    Reply(Vec<u8>),
    /// Never answer
    Silent,
    /// Refuse every write
    FailWrites,
}

#[derive(Debug)]
struct Shared {
    behavior: AckBehavior,
    frames: Vec<String>,
    write_attempts: usize,
    closed: bool,
}

pub struct MemoryChannel {
    id: ChannelId,
    shared: Arc<Mutex<Shared>>,
    pending_reply: bool,
}

#[derive(Clone)]
pub struct MemoryProbe {
    id: ChannelId,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryChannel {
    pub fn new(behavior: AckBehavior) -> (Self, MemoryProbe) {
        let id = ChannelId::new();
        let shared = Arc::new(Mutex::new(Shared {
            behavior,
            frames: Vec::new(),
            write_attempts: 0,
            closed: false,
        }));

        let channel = Self {
            id,
            shared: shared.clone(),
            pending_reply: false,
        };
        (channel, MemoryProbe { id, shared })
    }
}

impl MemoryProbe {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Frames successfully written, oldest first
    pub fn frames(&self) -> Vec<String> {
        lock(&self.shared).frames.clone()
    }

    /// Writes attempted, including refused ones
    pub fn write_attempts(&self) -> usize {
        lock(&self.shared).write_attempts
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    pub fn set_behavior(&self, behavior: AckBehavior) {
        lock(&self.shared).behavior = behavior;
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn write_message(&mut self, frame: &str) -> Result<(), ChannelError> {
        let mut shared = lock(&self.shared);
        shared.write_attempts += 1;

        if shared.closed {
            return Err(ChannelError::Closed);
        }
        if shared.behavior == AckBehavior::FailWrites {
            return Err(ChannelError::Write("peer refused frame".to_string()));
        }

        shared.frames.push(frame.to_string());
        self.pending_reply = true;
        Ok(())
    }

    async fn read_with_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let reply = {
            let shared = lock(&self.shared);
            if shared.closed {
                return Err(ChannelError::Closed);
            }
            match (&shared.behavior, self.pending_reply) {
                (AckBehavior::Ack, true) => Some(ACK_PAYLOAD.to_vec()),
                (AckBehavior::Reply(payload), true) => Some(payload.clone()),
                _ => None,
            }
        };

        match reply {
            Some(payload) => {
                self.pending_reply = false;
                Ok(payload)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Err(ChannelError::Timeout)
            }
        }
    }

    async fn close(&mut self) {
        lock(&self.shared).closed = true;
    }
}
