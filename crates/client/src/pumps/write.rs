//! WebSocket write pump: serialises outbound messages and keeps the
//! connection alive with pings.

use futures_util::SinkExt;
use relay_protocol::constants::WS_PING_PERIOD;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Writes queued messages to the transport until cancelled or the queue
/// closes, pinging every [`WS_PING_PERIOD`]. A write error cancels `cancel`
/// so the read side stops too.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = write.send(m).await {
                            warn!("WebSocket write error: {e}");
                            cancel.cancel();
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                trace!("sending keepalive ping");
                if let Err(e) = write.send(tungstenite::Message::Ping(Vec::new().into())).await {
                    warn!("WebSocket ping error: {e}");
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
