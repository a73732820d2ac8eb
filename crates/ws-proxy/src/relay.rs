use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Per-connection metadata passed to interceptors.
pub struct ConnectionContext {
    /// Unique identifier for this proxied WebSocket session.
    pub connection_id: uuid::Uuid,
    /// The TCP address of the connecting client.
    pub remote_addr: SocketAddr,
}

/// The writer task behind a [`LegHandle`] has gone away.
#[derive(Debug, Error)]
#[error("connection leg is closed")]
pub struct LegClosed;

/// Cloneable handle for writing frames to one side of a relayed connection.
///
/// Frames are queued to the writer task that owns the socket's write half,
/// so writes from both relay directions (forwarded frames and notices) are
/// delivered in the order they were enqueued.
#[derive(Clone, Debug)]
pub struct LegHandle {
    tx: mpsc::Sender<Message>,
}

impl LegHandle {
    /// Create a handle together with the receiving end its writer task
    /// drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Queue a frame. Waits if the writer is behind.
    pub async fn send(&self, msg: Message) -> Result<(), LegClosed> {
        self.tx.send(msg).await.map_err(|_| LegClosed)
    }

    /// Queue a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), LegClosed> {
        self.send(Message::Text(text.into().into())).await
    }

    /// Resolves once the writer task has stopped accepting frames.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Hook invoked for every text or binary frame relayed by the proxy.
///
/// `target` is always the backend leg and `source` always the client leg,
/// whichever way the frame is travelling. Returning `None` drops the frame;
/// an interceptor that drops a frame is responsible for telling whichever
/// leg should learn about it.
///
/// Calls for one direction of one connection never overlap: the relay
/// awaits each call before reading the next frame.
#[async_trait]
pub trait MessageInterceptor: Send + Sync {
    /// A frame travelling from the client toward the backend.
    async fn on_inbound(
        &self,
        msg: Message,
        target: &LegHandle,
        source: &LegHandle,
        ctx: &ConnectionContext,
    ) -> Option<Message>;

    /// A frame travelling from the backend back toward the client.
    async fn on_outbound(
        &self,
        msg: Message,
        target: &LegHandle,
        source: &LegHandle,
        ctx: &ConnectionContext,
    ) -> Option<Message>;
}
