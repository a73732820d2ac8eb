use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::relay::{ConnectionContext, LegHandle, MessageInterceptor};

/// Frames that may queue up for one leg before relays wait on the writer.
const LEG_BUFFER: usize = 64;

/// How long writer tasks get to flush queued frames after a relay ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the WebSocket reverse proxy.
pub struct ProxyConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// WebSocket URL of the backend, e.g. `ws://127.0.0.1:18790`.
    pub upstream_url: String,
    /// Ordered interceptor chain. A frame passes through every interceptor
    /// in sequence until one drops it.
    pub interceptors: Vec<Arc<dyn MessageInterceptor>>,
    /// Audit log sink for recording connection events.
    pub audit: AuditSink,
}

/// The WebSocket reverse proxy server.
///
/// Accepts client WebSocket connections, opens a matching connection to the
/// backend, and relays frames in both directions while running each data
/// frame through the configured [`MessageInterceptor`] chain.
pub struct Proxy {
    config: Arc<ProxyConfig>,
}

impl Proxy {
    /// Create a new proxy with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Bind to `listen_addr` and serve until an accept error occurs.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener. Each connection is
    /// handled in its own Tokio task.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "ws-proxy listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, config).await {
                    tracing::error!(%remote_addr, %err, "connection handler error");
                }
            });
        }
    }
}

/// Handle a single TCP connection from accept through WebSocket relay and
/// teardown.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<ProxyConfig>,
) -> anyhow::Result<()> {
    let connection_id = uuid::Uuid::new_v4();

    // ------------------------------------------------------------------
    // 1. Client handshake.
    // ------------------------------------------------------------------
    let client_ws = tokio_tungstenite::accept_async(stream).await?;

    tracing::info!(%connection_id, %remote_addr, "client connected");

    config
        .audit
        .log(AuditEntry::new(
            AuditEventType::ConnectionOpened,
            make_source(connection_id, remote_addr),
            serde_json::json!({
                "remote_addr": remote_addr.to_string(),
            }),
        ))
        .await;

    // ------------------------------------------------------------------
    // 2. Connect to the backend.
    // ------------------------------------------------------------------
    let upstream_ws = match tokio_tungstenite::connect_async(config.upstream_url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            config
                .audit
                .log(AuditEntry::new(
                    AuditEventType::UpstreamConnectFailed,
                    make_source(connection_id, remote_addr),
                    serde_json::json!({
                        "upstream": config.upstream_url,
                        "error": err.to_string(),
                    }),
                ))
                .await;
            return Err(err.into());
        }
    };

    tracing::debug!(%connection_id, upstream = %config.upstream_url, "upstream connected");

    // ------------------------------------------------------------------
    // 3. One reader and one writer task per leg, one relay task per
    //    direction.
    // ------------------------------------------------------------------
    let (client_write, client_read) = client_ws.split();
    let (upstream_write, upstream_read) = upstream_ws.split();

    let (client_leg, client_rx) = LegHandle::channel(LEG_BUFFER);
    let (upstream_leg, upstream_rx) = LegHandle::channel(LEG_BUFFER);

    let client_writer = tokio::spawn(pump_writes(client_rx, client_write, "client", connection_id));
    let upstream_writer = tokio::spawn(pump_writes(
        upstream_rx,
        upstream_write,
        "upstream",
        connection_id,
    ));

    let (client_frames_tx, client_frames) = mpsc::channel(LEG_BUFFER);
    let (upstream_frames_tx, upstream_frames) = mpsc::channel(LEG_BUFFER);
    let (client_closed_tx, client_closed) = watch::channel(false);
    let (upstream_closed_tx, upstream_closed) = watch::channel(false);

    let client_reader = tokio::spawn(pump_reads(
        client_read,
        client_frames_tx,
        client_closed_tx,
        "client",
        connection_id,
    ));
    let upstream_reader = tokio::spawn(pump_reads(
        upstream_read,
        upstream_frames_tx,
        upstream_closed_tx,
        "upstream",
        connection_id,
    ));

    let readers = ReadersClosed {
        client: client_closed,
        upstream: upstream_closed,
    };
    let ctx = Arc::new(ConnectionContext {
        connection_id,
        remote_addr,
    });

    let mut inbound = tokio::spawn(relay_messages(
        client_frames,
        Direction::Inbound,
        Legs {
            target: upstream_leg.clone(),
            source: client_leg.clone(),
            readers: readers.clone(),
        },
        config.interceptors.clone(),
        Arc::clone(&ctx),
    ));
    let mut outbound = tokio::spawn(relay_messages(
        upstream_frames,
        Direction::Outbound,
        Legs {
            target: upstream_leg,
            source: client_leg,
            readers,
        },
        config.interceptors.clone(),
        Arc::clone(&ctx),
    ));

    // Wait for either direction to finish (usually means one side closed),
    // then abandon the other, including any interception still in flight.
    tokio::select! {
        result = &mut inbound => {
            if let Err(err) = result {
                tracing::debug!(%connection_id, %err, "inbound relay task ended");
            }
            outbound.abort();
        }
        result = &mut outbound => {
            if let Err(err) = result {
                tracing::debug!(%connection_id, %err, "outbound relay task ended");
            }
            inbound.abort();
        }
    }
    client_reader.abort();
    upstream_reader.abort();

    // The aborted relay drops its leg handles, which lets both writers drain
    // and exit.
    let drained = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, async {
        let _ = client_writer.await;
        let _ = upstream_writer.await;
    })
    .await;
    if drained.is_err() {
        tracing::debug!(%connection_id, "writers did not drain in time");
    }

    tracing::info!(%connection_id, %remote_addr, "connection closed");

    config
        .audit
        .log(AuditEntry::new(
            AuditEventType::ConnectionClosed,
            make_source(connection_id, remote_addr),
            serde_json::json!({
                "remote_addr": remote_addr.to_string(),
            }),
        ))
        .await;

    Ok(())
}

/// Direction of message flow, used for choosing the interceptor hook and
/// the destination leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Client -> backend
    Inbound,
    /// Backend -> client
    Outbound,
}

/// Drain queued frames into one socket's write half. Stops after a close
/// frame or the first write error; dropping `rx` then marks the leg closed.
async fn pump_writes<W>(
    mut rx: mpsc::Receiver<Message>,
    mut writer: W,
    leg: &'static str,
    connection_id: uuid::Uuid,
) where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if let Err(err) = writer.send(msg).await {
            tracing::debug!(%connection_id, leg, %err, "write error, closing leg");
            return;
        }
        if is_close {
            break;
        }
    }
    let _ = writer.close().await;
}

/// Forward frames from one socket's read half into the relay's queue.
///
/// Runs independently of the relay so that the end of the stream is seen
/// even while the relay is waiting on an interception. `closed` is set to
/// `true` once reading stops for any reason.
async fn pump_reads<R>(
    mut reader: R,
    frames: mpsc::Sender<Message>,
    closed: watch::Sender<bool>,
    leg: &'static str,
    connection_id: uuid::Uuid,
) where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(result) = reader.next().await {
        match result {
            Ok(msg) => {
                let is_close = matches!(msg, Message::Close(_));
                if frames.send(msg).await.is_err() || is_close {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(%connection_id, leg, %err, "read error, closing leg");
                break;
            }
        }
    }
    closed.send_replace(true);
}

/// Read-side state of both sockets of one connection.
#[derive(Clone)]
struct ReadersClosed {
    client: watch::Receiver<bool>,
    upstream: watch::Receiver<bool>,
}

impl ReadersClosed {
    /// Resolves once either socket's read half has ended. A reader task
    /// that is gone counts as ended.
    async fn either(&self) {
        tokio::select! {
            _ = reader_ended(self.client.clone()) => {}
            _ = reader_ended(self.upstream.clone()) => {}
        }
    }
}

async fn reader_ended(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|ended| *ended).await;
}

/// Everything a relay writes to or watches for one connection.
struct Legs {
    target: LegHandle,
    source: LegHandle,
    readers: ReadersClosed,
}

impl Legs {
    /// Resolves once any side of the connection has gone away.
    async fn closed(&self) {
        tokio::select! {
            _ = self.target.closed() => {}
            _ = self.source.closed() => {}
            _ = self.readers.either() => {}
        }
    }
}

/// Relay queued frames for one direction, running each text or binary
/// frame through the interceptor chain before queueing it on the
/// destination leg.
///
/// Frames are handled strictly one at a time. If either socket closes, for
/// reading or writing, while an interception is in flight, the interception
/// is abandoned and nothing is written.
async fn relay_messages(
    mut frames: mpsc::Receiver<Message>,
    direction: Direction,
    legs: Legs,
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
    ctx: Arc<ConnectionContext>,
) {
    let Legs { target, source, .. } = &legs;
    let destination = match direction {
        Direction::Inbound => target,
        Direction::Outbound => source,
    };

    while let Some(msg) = frames.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                let outcome = tokio::select! {
                    biased;
                    _ = legs.closed() => None,
                    verdict = run_interceptors(&interceptors, msg, direction, target, source, &ctx) => {
                        Some(verdict)
                    }
                };

                match outcome {
                    None => {
                        tracing::debug!(
                            connection_id = %ctx.connection_id,
                            ?direction,
                            "connection closed during interception, abandoning relay"
                        );
                        break;
                    }
                    Some(Some(forward)) => {
                        if destination.send(forward).await.is_err() {
                            break;
                        }
                    }
                    Some(None) => {
                        tracing::debug!(
                            connection_id = %ctx.connection_id,
                            ?direction,
                            "message dropped by interceptor"
                        );
                    }
                }
            }
            Message::Close(frame) => {
                let _ = destination.send(Message::Close(frame)).await;
                break;
            }
            // Ping and pong pass through unchanged; raw frames are never
            // yielded by a reader.
            Message::Frame(_) => {}
            other => {
                if destination.send(other).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Pass a frame through the chain. The first interceptor to drop it stops
/// the chain.
async fn run_interceptors(
    interceptors: &[Arc<dyn MessageInterceptor>],
    msg: Message,
    direction: Direction,
    target: &LegHandle,
    source: &LegHandle,
    ctx: &ConnectionContext,
) -> Option<Message> {
    let mut current = msg;

    for interceptor in interceptors {
        current = match direction {
            Direction::Inbound => interceptor.on_inbound(current, target, source, ctx).await?,
            Direction::Outbound => interceptor.on_outbound(current, target, source, ctx).await?,
        };
    }

    Some(current)
}

/// Construct an [`AuditSource`] for the ws-proxy component.
fn make_source(connection_id: uuid::Uuid, remote_addr: SocketAddr) -> AuditSource {
    AuditSource {
        component: "ws-proxy".to_string(),
        remote_addr: Some(remote_addr.to_string()),
        session_id: Some(connection_id.to_string()),
    }
}
