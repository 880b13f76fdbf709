//! Relay broker between editor hosts and dispatchers.
//!
//! Accepts WebSocket connections, registers each client under the id it
//! announces, relays `message` frames across roles and keeps every
//! dispatcher informed of the current roster.

mod ack;
mod broker;
mod connection;
mod registry;
mod roster;
mod router;
mod server;

pub use ack::{ACK_TRACKING_CAPACITY, AckCorrelator, AckOutcome};
pub use broker::Broker;
pub use connection::{ConnId, ConnectionState, SendError, Sender};
pub use registry::{Connection, ConnectionRegistry};
pub use server::{BrokerConfig, BrokerServer};

/// Per-connection send buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the broker server.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("broker already started")]
    AlreadyRunning,
}
