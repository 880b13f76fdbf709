//! Registered connections keyed by announced id.

use relay_protocol::{ClientInfo, ClientRole};
use tracing::info;

use crate::connection::{ConnId, Sender};

/// A transport that has announced itself.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub role: ClientRole,
    sender: Sender,
}

impl Connection {
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn conn_id(&self) -> ConnId {
        self.sender.conn_id()
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo::new(self.id.clone(), self.role)
    }
}

/// The set of currently registered connections.
///
/// Holds at most one entry per id. Entries keep their registration order;
/// a replacement takes over the slot of the entry it replaces.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` under `id`, replacing any existing entry for `id`.
    ///
    /// The replaced transport is left open.
    pub fn register(&mut self, id: impl Into<String>, role: ClientRole, sender: Sender) -> Connection {
        let conn = Connection {
            id: id.into(),
            role,
            sender,
        };

        match self.entries.iter_mut().find(|c| c.id == conn.id) {
            Some(existing) => {
                info!(
                    client_id = %conn.id,
                    old = %existing.conn_id(),
                    new = %conn.conn_id(),
                    "id already registered, replacing mapping"
                );
                *existing = conn.clone();
            }
            None => self.entries.push(conn.clone()),
        }
        conn
    }

    /// Removes whichever entry owns `conn`, if any.
    pub fn unregister(&mut self, conn: ConnId) -> Option<Connection> {
        let idx = self.entries.iter().position(|c| c.conn_id() == conn)?;
        Some(self.entries.remove(idx))
    }

    /// Snapshot of all entries.
    pub fn list(&self) -> Vec<Connection> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.entries.iter().find(|c| c.id == id)
    }

    /// The entry currently owned by a transport.
    pub fn by_conn(&self, conn: ConnId) -> Option<&Connection> {
        self.entries.iter().find(|c| c.conn_id() == conn)
    }

    pub fn dispatchers(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter().filter(|c| c.role.is_dispatcher())
    }

    /// `{id, isDispatcher}` for every entry, in registry order.
    pub fn roster(&self) -> Vec<ClientInfo> {
        self.entries.iter().map(Connection::info).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
