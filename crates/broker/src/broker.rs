//! Frame handling and the shared connection registry.

use relay_protocol::{ClientInfo, ClientRole, Frame};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ack::{AckCorrelator, AckOutcome};
use crate::connection::{ConnId, ConnectionState, Sender, Session};
use crate::registry::{Connection, ConnectionRegistry};
use crate::{roster, router};

/// Owns the registry and applies inbound frames to it.
///
/// Every registry mutation and the fan-out that follows it happen under a
/// single lock, so dispatchers observe one roster per mutation in order.
pub struct Broker {
    registry: Mutex<ConnectionRegistry>,
    acks: AckCorrelator,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            acks: AckCorrelator::new(),
        }
    }

    /// Registers `sender` under `id` and pushes the new roster to dispatchers.
    pub async fn announce(
        &self,
        sender: &Sender,
        id: &str,
        explicit_role: Option<ClientRole>,
    ) -> Connection {
        let role = ClientRole::resolve(id, explicit_role);
        let mut registry = self.registry.lock().await;
        let conn = registry.register(id, role, sender.clone());
        info!(client_id = %id, %role, conn = %sender.conn_id(), "client registered");
        roster::broadcast(&registry);
        conn
    }

    /// Stamps a fresh message id on `text` and relays it to the peer role.
    ///
    /// Returns the assigned id and how many connections received it.
    pub async fn relay(&self, origin: ClientRole, text: &str) -> (String, usize) {
        let message_id = self.acks.new_id();
        let frame = Frame::message(text, message_id.as_str());
        let delivered = {
            let registry = self.registry.lock().await;
            router::route(&registry, origin, &frame)
        };
        debug!(%message_id, %origin, delivered, "message relayed");
        (message_id, delivered)
    }

    /// Records an acknowledgment; the outcome is informational only.
    pub fn acknowledge(&self, message_id: &str) -> AckOutcome {
        self.acks.correlate(message_id)
    }

    /// Drops whatever entry `conn` owns and, if one was removed, pushes the
    /// new roster.
    pub async fn disconnect(&self, conn: ConnId) -> Option<Connection> {
        let mut registry = self.registry.lock().await;
        let removed = registry.unregister(conn)?;
        info!(client_id = %removed.id, role = %removed.role, %conn, "client unregistered");
        roster::broadcast(&registry);
        Some(removed)
    }

    /// Marks `session` as closing and drops its registry entry, if it ever
    /// announced.
    pub(crate) async fn close_session(&self, session: &mut Session) -> Option<Connection> {
        let was_open = session.state == ConnectionState::Open;
        session.state = ConnectionState::Closing;
        if !was_open {
            return None;
        }
        self.disconnect(session.conn_id()).await
    }

    /// Current roster snapshot.
    pub async fn roster(&self) -> Vec<ClientInfo> {
        self.registry.lock().await.roster()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Applies one decoded frame from a session.
    pub(crate) async fn dispatch(&self, session: &mut Session, frame: Frame) {
        let conn = session.conn_id();
        if session.state == ConnectionState::Closing {
            debug!(%conn, frame_type = frame.type_name(), "frame on closing connection ignored");
            return;
        }
        match frame {
            Frame::Announce { id, role } => {
                let Some(id) = id.filter(|id| !id.is_empty()) else {
                    debug!(%conn, "announce without id ignored");
                    return;
                };
                if session.state == ConnectionState::Open {
                    warn!(%conn, client_id = %id, "connection already announced, ignoring");
                    return;
                }
                let registered = self.announce(&session.sender, &id, role).await;
                session.role = Some(registered.role);
                session.client_id = Some(registered.id);
                session.state = ConnectionState::Open;
            }

            Frame::Message { text, .. } => {
                let Some(origin) = Self::announced_role(session, "message") else {
                    return;
                };
                let Some(text) = text else {
                    debug!(%conn, "message without text ignored");
                    return;
                };
                self.relay(origin, &text).await;
            }

            Frame::Ack { message_id } => {
                if Self::announced_role(session, "ack").is_none() {
                    return;
                }
                match message_id {
                    Some(id) => {
                        self.acknowledge(&id);
                    }
                    None => debug!(%conn, "ack without messageId ignored"),
                }
            }

            Frame::ClientList { .. } => {
                warn!(%conn, "client_list is broker-only, ignoring");
            }
        }
    }

    fn announced_role(session: &Session, frame_type: &str) -> Option<ClientRole> {
        let role = session.role.filter(|_| session.state == ConnectionState::Open);
        if role.is_none() {
            debug!(conn = %session.conn_id(), frame_type, "frame before announce ignored");
        }
        role
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
