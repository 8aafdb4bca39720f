/// WebSocket transport over actix-ws
///
/// The actix message stream is tied to the worker thread that accepted the
/// connection, so it cannot live inside the registry. `WsChannel::start` splits a
/// connection in two:
/// - `WsChannel`: the `Send` half kept in the registry (session for writes, inbox
///   for replies)
/// - `InboundPump`: a local future that drains the socket, answers protocol pings
///   and forwards client payloads to the inbox. It completes when the client goes
///   away.
use std::time::Duration;

use actix_ws::{CloseCode, CloseReason as WsCloseReason, Message, MessageStream, Session};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::channel::{ChannelError, ChannelId, TransportChannel};

/// Client payloads buffered while nobody is waiting for a reply
const INBOX_CAPACITY: usize = 16;

pub struct WsChannel {
    id: ChannelId,
    session: Session,
    inbox: mpsc::Receiver<Vec<u8>>,
}

pub struct InboundPump {
    id: ChannelId,
    session: Session,
    stream: MessageStream,
    inbox: mpsc::Sender<Vec<u8>>,
}

impl WsChannel {
    pub fn start(session: Session, stream: MessageStream) -> (Self, InboundPump) {
        let id = ChannelId::new();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let channel = Self {
            id,
            session: session.clone(),
            inbox: rx,
        };
        let pump = InboundPump {
            id,
            session,
            stream,
            inbox: tx,
        };
        (channel, pump)
    }

    /// Drop replies nobody asked for, so the next read answers the next write
    fn discard_stale(&mut self) {
        let mut dropped = 0usize;
        while self.inbox.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(channel_id = %self.id, dropped, "discarded unsolicited client payloads");
        }
    }
}

impl InboundPump {
    /// Run until the client disconnects or the socket errors
    pub async fn run(mut self) {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => self.forward(text.as_bytes().to_vec()),
                Ok(Message::Binary(bytes)) => self.forward(bytes.to_vec()),
                Ok(Message::Ping(bytes)) => {
                    if self.session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(reason)) => {
                    tracing::debug!(channel_id = %self.id, ?reason, "client sent close frame");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(channel_id = %self.id, error = %e, "websocket protocol error");
                    break;
                }
            }
        }
    }

    fn forward(&self, payload: Vec<u8>) {
        if self.inbox.try_send(payload).is_err() {
            tracing::debug!(channel_id = %self.id, "inbox full, dropping client payload");
        }
    }
}

#[async_trait]
impl TransportChannel for WsChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn write_message(&mut self, frame: &str) -> Result<(), ChannelError> {
        self.discard_stale();
        self.session
            .text(frame.to_string())
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn read_with_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::Timeout),
        }
    }

    async fn close(&mut self) {
        let reason = WsCloseReason {
            code: CloseCode::Normal,
            description: None,
        };
        if self.session.clone().close(Some(reason)).await.is_err() {
            tracing::debug!(channel_id = %self.id, "session already closed");
        }
    }
}
