//! Per-transport session: read/write pumps, keepalive, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use relay_protocol::constants::{WS_PING_PERIOD, WS_PONG_WAIT};
use relay_protocol::{ClientRole, Frame, FrameError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SEND_BUFFER_SIZE;
use crate::broker::Broker;

/// Broker-local identity of a transport, independent of the client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, waiting for a valid `announce`.
    Registering,
    /// Announced and registered.
    Open,
    /// Teardown in progress.
    Closing,
}

/// Handle for writing to one transport.
///
/// Cloneable; wraps an `mpsc::Sender`.
#[derive(Debug, Clone)]
pub struct Sender {
    conn: ConnId,
    tx: mpsc::Sender<WsMessage>,
}

/// Error returned when the send buffer is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

impl Sender {
    pub(crate) fn new(conn: ConnId, tx: mpsc::Sender<WsMessage>) -> Self {
        Self { conn, tx }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn
    }

    /// Encodes and queues a frame without waiting.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), SendError> {
        let json = frame.encode().map_err(|_| SendError)?;
        self.send_text(json)
    }

    /// Queues already-encoded JSON text without waiting.
    pub(crate) fn send_text(&self, json: String) -> Result<(), SendError> {
        self.tx
            .try_send(WsMessage::Text(json.into()))
            .map_err(|_| SendError)
    }

    /// Returns `true` if the write pump is still draining this buffer.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Read-side view of a session, updated as frames arrive.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) sender: Sender,
    pub(crate) state: ConnectionState,
    pub(crate) client_id: Option<String>,
    pub(crate) role: Option<ClientRole>,
}

impl Session {
    pub(crate) fn new(sender: Sender) -> Self {
        Self {
            sender,
            state: ConnectionState::Registering,
            client_id: None,
            role: None,
        }
    }

    pub(crate) fn conn_id(&self) -> ConnId {
        self.sender.conn_id()
    }
}

/// Spawns the read and write pumps for an accepted WebSocket.
///
/// Pumps stop when the peer goes away or `server_cancel` fires; on exit the
/// connection is removed from the broker.
pub(crate) fn spawn_connection<S>(
    ws_stream: S,
    conn: ConnId,
    peer_addr: SocketAddr,
    broker: Arc<Broker>,
    server_cancel: &CancellationToken,
) -> Sender
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender::new(conn, tx);

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let session = Session::new(sender.clone());
    tokio::spawn(async move {
        let mut session = session;
        read_pump(ws_stream, &mut session, &broker, cancel.clone()).await;
        // When the read pump exits, stop the write pump too.
        cancel.cancel();
        broker.close_session(&mut session).await;
        info!(%conn, %peer_addr, client_id = ?session.client_id, "connection closed");
    });

    sender
}

/// Write pump: drains the send buffer and pings the peer. A failed write
/// cancels `cancel` so the read pump tears the session down too.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            warn!("write pump send error: {e}");
                            cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    warn!("write pump ping error: {e}");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: decodes text frames and hands them to the broker.
async fn read_pump<S>(mut stream: S, session: &mut Session, broker: &Broker, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
{
    // Any incoming frame resets the deadline, not only pongs.
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!(conn = %session.conn_id(), "read deadline expired, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        match ws_msg {
                            WsMessage::Text(text) => {
                                handle_text(broker, session, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                debug!(conn = %session.conn_id(), len = data.len(), "ignoring binary frame");
                            }
                            WsMessage::Ping(data) => {
                                let _ = session.sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => {
                                debug!(conn = %session.conn_id(), "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!(conn = %session.conn_id(), "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn handle_text(broker: &Broker, session: &mut Session, text: &str) {
    match Frame::decode(text) {
        Ok(frame) => broker.dispatch(session, frame).await,
        Err(FrameError::UnknownType(t)) => {
            warn!(conn = %session.conn_id(), frame_type = %t, "ignoring unknown frame type");
        }
        Err(e) => {
            warn!(conn = %session.conn_id(), "dropping frame: {e}");
        }
    }
}
