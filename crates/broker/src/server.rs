//! Broker WebSocket server.
//!
//! Listens on a TCP port and upgrades every accepted connection to
//! WebSocket. Each instance is independent: tests can run several on
//! ephemeral ports side by side.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use relay_protocol::constants::{DEFAULT_PORT, WS_MAX_MESSAGE_SIZE};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::BrokerError;
use crate::broker::Broker;
use crate::connection::{self, ConnId};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to bind.
    pub bind_address: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
        }
    }
}

impl BrokerConfig {
    /// Loopback with an OS-assigned port.
    pub fn ephemeral() -> Self {
        Self {
            port: 0,
            ..Self::default()
        }
    }
}

/// The relay broker server.
pub struct BrokerServer {
    config: BrokerConfig,
    broker: Arc<Broker>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    next_conn: AtomicU64,
    started: AtomicBool,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            broker: Arc::new(Broker::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            next_conn: AtomicU64::new(1),
            started: AtomicBool::new(false),
        })
    }

    /// The frame-handling core shared by all connections.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Returns the bound address. Only available after [`start`](Self::start).
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// An instance can be started once; after [`stop`](Self::stop) build a
    /// new one.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, BrokerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("broker listening on ws://{local_addr}");

        tokio::spawn(Arc::clone(self).accept_loop(listener));
        Ok(local_addr)
    }

    /// Starts the server and waits until [`stop`](Self::stop) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), BrokerError> {
        self.start().await?;
        self.cancel.cancelled().await;
        Ok(())
    }

    /// Closes every connection and releases the listening socket.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("broker shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
        // Dropping the listener releases the port.
    }

    /// Upgrades one TCP connection and starts its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), BrokerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let conn = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        info!(%peer_addr, %conn, "WebSocket connection established");

        connection::spawn_connection(
            ws_stream,
            conn,
            peer_addr,
            Arc::clone(&self.broker),
            &self.cancel,
        );
        Ok(())
    }
}
