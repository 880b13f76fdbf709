//! Client side of the relay.
//!
//! [`ClientAgent`] resolves an id from its [`LocalBus`], connects to the
//! broker, announces itself and then shuttles payloads between the broker
//! and the bus, reconnecting whenever the transport goes away. The same
//! state machine runs inside editor hosts and dispatchers.

pub mod agent;
pub mod bus;
mod pumps;
pub mod transport;
pub mod types;

pub use agent::{ClientAgent, ClientHandle, SendError};
pub use bus::{BusEndpoint, BusEvent, BusFuture, ChannelBus, IdRequest, LocalBus};
pub use transport::{Connector, Transport, WsConnector};
pub use types::{AgentState, ClientConfig, MIN_RECONNECT_DELAY, ReconnectConfig};

/// Send buffer capacity for outbound frames and payloads.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors from the client transport.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Generates an editor-side id (`editor-<uuid>`).
pub fn generate_host_id() -> String {
    format!(
        "{}{}",
        relay_protocol::constants::HOST_ID_PREFIX,
        uuid::Uuid::new_v4()
    )
}

/// Generates a dispatcher id (`dispatcher-<uuid>`).
pub fn generate_dispatcher_id() -> String {
    format!(
        "{}{}",
        relay_protocol::constants::DISPATCHER_ID_PREFIX,
        uuid::Uuid::new_v4()
    )
}
