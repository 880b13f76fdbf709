//! The agent's seam to its hosting process.
//!
//! A [`LocalBus`] supplies the connection id and receives whatever the
//! broker delivers. [`ChannelBus`] implements it over in-process channels:
//! the id is obtained through an id-request/id-response exchange and
//! everything else is forwarded as [`BusEvent`]s.

use std::future::Future;
use std::pin::Pin;

use relay_protocol::ClientInfo;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// A boxed future returned by bus methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Local side of a [`ClientAgent`](crate::ClientAgent).
pub trait LocalBus: Send + Sync + 'static {
    /// Resolves the id to announce. May never complete; the agent waits
    /// (or is disposed) meanwhile.
    fn resolve_id(&self) -> BusFuture<'_, String>;

    /// Called for every `message` frame received from the broker, before
    /// the ack is sent back.
    fn on_message(&self, text: String, message_id: Option<String>) -> BusFuture<'_, ()>;

    /// Called after a locally-originated payload was handed to the transport.
    fn on_sent(&self, text: String) -> BusFuture<'_, ()> {
        let _ = text;
        Box::pin(async {})
    }

    /// Called with each roster update (dispatchers only receive these).
    fn on_roster(&self, clients: Vec<ClientInfo>) -> BusFuture<'_, ()> {
        let _ = clients;
        Box::pin(async {})
    }
}

/// Something the agent forwarded to the hosting process.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Payload received from the broker.
    Message {
        text: String,
        message_id: Option<String>,
    },
    /// A local payload went out on the transport.
    Sent(String),
    /// Current roster.
    Roster(Vec<ClientInfo>),
}

/// A pending id request; answer it with [`respond`](Self::respond).
#[derive(Debug)]
pub struct IdRequest(oneshot::Sender<String>);

impl IdRequest {
    pub fn respond(self, id: impl Into<String>) {
        // The agent may have been disposed while waiting.
        let _ = self.0.send(id.into());
    }
}

/// The hosting process's end of a [`ChannelBus`].
#[derive(Debug)]
pub struct BusEndpoint {
    pub id_requests: mpsc::Receiver<IdRequest>,
    pub events: mpsc::Receiver<BusEvent>,
}

/// Channel-backed [`LocalBus`].
#[derive(Debug, Clone)]
pub struct ChannelBus {
    id_requests: mpsc::Sender<IdRequest>,
    events: mpsc::Sender<BusEvent>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> (Self, BusEndpoint) {
        let (id_tx, id_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        (
            Self {
                id_requests: id_tx,
                events: events_tx,
            },
            BusEndpoint {
                id_requests: id_rx,
                events: events_rx,
            },
        )
    }

    async fn forward(&self, event: BusEvent) {
        if self.events.send(event).await.is_err() {
            warn!("bus endpoint dropped, discarding event");
        }
    }
}

impl LocalBus for ChannelBus {
    fn resolve_id(&self) -> BusFuture<'_, String> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            if self.id_requests.send(IdRequest(tx)).await.is_ok()
                && let Ok(id) = rx.await
            {
                return id;
            }
            // Nobody will ever answer.
            warn!("id request went unanswered, waiting indefinitely");
            std::future::pending().await
        })
    }

    fn on_message(&self, text: String, message_id: Option<String>) -> BusFuture<'_, ()> {
        Box::pin(self.forward(BusEvent::Message { text, message_id }))
    }

    fn on_sent(&self, text: String) -> BusFuture<'_, ()> {
        Box::pin(self.forward(BusEvent::Sent(text)))
    }

    fn on_roster(&self, clients: Vec<ClientInfo>) -> BusFuture<'_, ()> {
        Box::pin(self.forward(BusEvent::Roster(clients)))
    }
}
