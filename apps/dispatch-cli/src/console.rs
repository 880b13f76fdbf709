//! Prints broker traffic to stdout.

use std::sync::Mutex;

use relay_client::{BusFuture, LocalBus};
use relay_protocol::ClientInfo;

pub struct ConsoleBus {
    id: String,
    roster: Mutex<Vec<ClientInfo>>,
}

impl ConsoleBus {
    pub fn new(id: String) -> Self {
        Self {
            id,
            roster: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hosts from the most recent roster.
    pub fn hosts(&self) -> Vec<String> {
        match self.roster.lock() {
            Ok(roster) => roster
                .iter()
                .filter(|c| !c.is_dispatcher)
                .map(|c| c.id.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn print_roster(&self) {
        let hosts = self.hosts();
        if hosts.is_empty() {
            println!("* no hosts connected");
        } else {
            println!("* hosts: {}", hosts.join(", "));
        }
    }
}

impl LocalBus for ConsoleBus {
    fn resolve_id(&self) -> BusFuture<'_, String> {
        Box::pin(async move { self.id.clone() })
    }

    fn on_message(&self, text: String, _message_id: Option<String>) -> BusFuture<'_, ()> {
        Box::pin(async move {
            println!("< {text}");
        })
    }

    fn on_roster(&self, clients: Vec<ClientInfo>) -> BusFuture<'_, ()> {
        Box::pin(async move {
            if let Ok(mut roster) = self.roster.lock() {
                *roster = clients;
            }
            self.print_roster();
        })
    }
}
