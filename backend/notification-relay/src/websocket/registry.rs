/// Connection registry
///
/// Authoritative set of open push channels. Every operation takes the registry
/// lock for its whole duration, so no caller can observe a half-applied change.
/// Iteration works on a snapshot taken under the read lock: the callback runs
/// after the lock is released, which lets the callback block on network I/O
/// without stalling registration or removal.
///
/// The registry never closes a channel itself. Other components ask the owning
/// connection task to terminate through the entry's control handle; that task
/// closes the channel and unregisters it.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::channel::{send_and_await_ack, ChannelError, ChannelId, TransportChannel};
use super::messages::PushFrame;
use crate::metrics;
use crate::models::Identity;

/// A channel shared between its owner task and whoever delivers through the registry
pub type SharedChannel = Arc<Mutex<Box<dyn TransportChannel>>>;

/// Why a connection is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnect,
    DeliveryFailure,
    LivenessFailure,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientDisconnect => "client_disconnect",
            CloseReason::DeliveryFailure => "delivery_failure",
            CloseReason::LivenessFailure => "liveness_failure",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("channel {0} is already registered")]
    AlreadyRegistered(ChannelId),
}

/// Sending half of a connection's termination signal
///
/// Capacity is one: the first reason wins and later requests are dropped, which
/// makes termination idempotent when the prober and dispatcher race.
#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: mpsc::Sender<CloseReason>,
}

impl ControlHandle {
    /// Ask the owning task to close. Returns `false` if a request was already pending
    /// or the owner is gone.
    pub fn terminate(&self, reason: CloseReason) -> bool {
        self.tx.try_send(reason).is_ok()
    }
}

/// Receiving half of a connection's termination signal, held by the owning task
#[derive(Debug)]
pub struct ControlSignal {
    rx: mpsc::Receiver<CloseReason>,
}

impl ControlSignal {
    /// Wait for a termination request
    pub async fn wait(&mut self) -> CloseReason {
        // Every handle lives in the registry entry; losing them all means the
        // entry was dropped out from under us.
        self.rx.recv().await.unwrap_or(CloseReason::Shutdown)
    }

    /// Termination request already delivered, if any
    pub fn try_take(&mut self) -> Option<CloseReason> {
        self.rx.try_recv().ok()
    }
}

/// One registered channel
#[derive(Clone)]
pub struct RegistrationEntry {
    pub id: ChannelId,
    pub owner: Identity,
    pub connected_at: DateTime<Utc>,
    channel: SharedChannel,
    control: ControlHandle,
    /// Set by the first failed exchange; shared by every clone of the entry
    failed: Arc<AtomicBool>,
}

impl RegistrationEntry {
    /// Push a frame and wait for the acknowledgement. Holds the channel lock for
    /// the whole exchange so concurrent pushes and probes never swap replies.
    ///
    /// Once an exchange fails the channel is out of step with the client (a late
    /// acknowledgement may still arrive), so every later exchange is refused
    /// without writing.
    pub async fn exchange(&self, frame: &PushFrame, timeout: Duration) -> Result<(), ChannelError> {
        let mut channel = self.channel.lock().await;
        if self.failed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }

        let result = send_and_await_ack(&mut **channel, frame, timeout).await;
        if result.is_err() {
            self.failed.store(true, Ordering::Release);
        }
        result
    }

    pub fn terminate(&self, reason: CloseReason) -> bool {
        let requested = self.control.terminate(reason);
        if requested {
            tracing::info!(
                channel_id = %self.id,
                subject = %self.owner.subject,
                reason = %reason,
                "termination requested"
            );
        }
        requested
    }
}

impl fmt::Debug for RegistrationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationEntry")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Handed to the connection task that registered a channel
pub struct Registration {
    pub id: ChannelId,
    pub channel: SharedChannel,
    pub signal: ControlSignal,
}

#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ChannelId, RegistrationEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open channel for `owner`
    ///
    /// Fails if a channel with the same id is already registered.
    pub async fn register(
        &self,
        channel: Box<dyn TransportChannel>,
        owner: Identity,
    ) -> Result<Registration, RegistryError> {
        let id = channel.id();
        let (tx, rx) = mpsc::channel(1);
        let channel: SharedChannel = Arc::new(Mutex::new(channel));

        let mut guard = self.inner.write().await;
        if guard.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let entry = RegistrationEntry {
            id,
            owner,
            connected_at: Utc::now(),
            channel: channel.clone(),
            control: ControlHandle { tx },
            failed: Arc::new(AtomicBool::new(false)),
        };
        tracing::info!(
            channel_id = %id,
            subject = %entry.owner.subject,
            area = %entry.owner.area,
            total = guard.len() + 1,
            "registered push channel"
        );
        guard.insert(id, entry);
        metrics::set_open_connections(guard.len());

        Ok(Registration {
            id,
            channel,
            signal: ControlSignal { rx },
        })
    }

    /// Remove a channel. Idempotent: returns the entry only on the call that removed it.
    pub async fn unregister(&self, id: ChannelId) -> Option<RegistrationEntry> {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(&id);

        if let Some(entry) = &removed {
            let connected_secs = (Utc::now() - entry.connected_at).num_seconds();
            tracing::info!(
                channel_id = %id,
                subject = %entry.owner.subject,
                connected_secs,
                remaining = guard.len(),
                "unregistered push channel"
            );
            metrics::set_open_connections(guard.len());
        }

        removed
    }

    /// Entries owned by `subject`, as of now
    pub async fn connections_for(&self, subject: &str) -> Vec<RegistrationEntry> {
        let guard = self.inner.read().await;
        guard
            .values()
            .filter(|entry| entry.owner.subject == subject)
            .cloned()
            .collect()
    }

    /// Every entry, as of now
    pub async fn snapshot(&self) -> Vec<RegistrationEntry> {
        let guard = self.inner.read().await;
        guard.values().cloned().collect()
    }

    /// Apply `f` to every entry whose owner is `subject`
    ///
    /// Runs on a snapshot, so entries registered or removed meanwhile are either
    /// fully seen or not seen at all. Calls run concurrently. Returns the number of
    /// entries visited.
    pub async fn for_each_matching<F, Fut>(&self, subject: &str, f: F) -> usize
    where
        F: FnMut(RegistrationEntry) -> Fut,
        Fut: Future<Output = ()>,
    {
        let entries = self.connections_for(subject).await;
        let visited = entries.len();
        join_all(entries.into_iter().map(f)).await;
        visited
    }

    /// Apply `f` to every registered entry; same snapshot rules as `for_each_matching`
    pub async fn for_each<F, Fut>(&self, f: F) -> usize
    where
        F: FnMut(RegistrationEntry) -> Fut,
        Fut: Future<Output = ()>,
    {
        let entries = self.snapshot().await;
        let visited = entries.len();
        join_all(entries.into_iter().map(f)).await;
        visited
    }

    /// Signal every connection to close
    pub async fn terminate_all(&self, reason: CloseReason) -> usize {
        let guard = self.inner.read().await;
        guard
            .values()
            .filter(|entry| entry.terminate(reason))
            .count()
    }

    pub async fn contains(&self, id: ChannelId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Hold a registered connection until `client_gone` completes or a termination
/// is requested, then unregister and close it. Runs once per registration.
pub async fn own_connection<F>(
    registry: ConnectionRegistry,
    registration: Registration,
    client_gone: F,
) -> CloseReason
where
    F: Future<Output = ()>,
{
    let Registration {
        id,
        channel,
        mut signal,
    } = registration;

    let reason = tokio::select! {
        reason = signal.wait() => reason,
        _ = client_gone => CloseReason::ClientDisconnect,
    };

    tracing::debug!(channel_id = %id, reason = %reason, "closing push channel");
    registry.unregister(id).await;
    channel.lock().await.close().await;
    reason
}
