//! WebSocket read pump: forwards broker frames to the local bus.

use std::time::Duration;

use futures_util::StreamExt;
use relay_protocol::{Frame, FrameError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::bus::LocalBus;

/// Reads frames until the transport ends or `cancel` fires. With an
/// `idle_timeout`, also gives up once that long passes without any traffic.
pub(crate) async fn read_pump<S, B>(
    mut read: S,
    bus: &B,
    write_tx: mpsc::Sender<tungstenite::Message>,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    B: LocalBus + ?Sized,
{
    // Any incoming frame resets the deadline, pongs to our pings included.
    let deadline = tokio::time::sleep(idle_timeout.unwrap_or_default());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline, if idle_timeout.is_some() => {
                warn!("no traffic from broker, dropping connection");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if let Some(timeout) = idle_timeout {
                            deadline.as_mut().reset(tokio::time::Instant::now() + timeout);
                        }
                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, bus, &write_tx).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {} // Pong, binary
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Handles one text frame from the broker.
async fn handle_text_message<B>(text: &str, bus: &B, write_tx: &mpsc::Sender<tungstenite::Message>)
where
    B: LocalBus + ?Sized,
{
    let frame = match Frame::decode(text) {
        Ok(f) => f,
        Err(FrameError::UnknownType(t)) => {
            warn!(frame_type = %t, "ignoring unknown frame type");
            return;
        }
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return;
        }
    };

    match frame {
        Frame::Message {
            text: Some(text),
            message_id,
        } => {
            trace!(message_id = ?message_id, "message received");
            bus.on_message(text, message_id.clone()).await;
            if let Some(id) = message_id {
                match Frame::ack(id).encode() {
                    Ok(json) => {
                        let _ = write_tx.send(tungstenite::Message::Text(json.into())).await;
                    }
                    Err(e) => warn!("failed to encode ack: {e}"),
                }
            }
        }
        Frame::Message { text: None, .. } => debug!("message without text ignored"),
        Frame::ClientList { clients } => bus.on_roster(clients).await,
        other => debug!(frame_type = other.type_name(), "ignoring frame"),
    }
}
