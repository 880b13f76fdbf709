//! The client agent state machine.
//!
//! ```text
//! Uninitialized -> AwaitingId -> Connecting -> Announced
//!                                   ^             |
//!                                   |             v
//!                                   +------ Reconnecting
//! ```
//!
//! Any state moves to `Disposed` on [`ClientHandle::dispose`], when the
//! handle is dropped, or when the reconnect policy runs out of attempts.

use std::sync::Arc;

use relay_protocol::Frame;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::LocalBus;
use crate::pumps::read::read_pump;
use crate::pumps::write::write_pump;
use crate::transport::{Connector, Transport, WsConnector};
use crate::types::{AgentState, ClientConfig};
use crate::SEND_BUFFER_SIZE;

/// Why a local payload could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected to the broker")]
    NotConnected,

    #[error("agent disposed")]
    Disposed,

    #[error("send buffer full")]
    BufferFull,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Disposed,
}

/// Runs the connect/announce/relay/reconnect cycle for one local bus.
pub struct ClientAgent<B: LocalBus, C: Connector = WsConnector> {
    config: ClientConfig,
    bus: Arc<B>,
    connector: C,
    state: watch::Sender<AgentState>,
    outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
}

impl<B: LocalBus> ClientAgent<B> {
    /// Starts an agent that connects over WebSocket.
    pub fn spawn(config: ClientConfig, bus: Arc<B>) -> ClientHandle {
        ClientAgent::spawn_with(config, bus, WsConnector)
    }
}

impl<B: LocalBus, C: Connector> ClientAgent<B, C> {
    /// Starts an agent that opens transports through `connector`.
    pub fn spawn_with(config: ClientConfig, bus: Arc<B>, connector: C) -> ClientHandle {
        let (state_tx, state_rx) = watch::channel(AgentState::Uninitialized);
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let cancel = CancellationToken::new();

        let agent = Self {
            config,
            bus,
            connector,
            state: state_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(agent.run());

        ClientHandle {
            outbound: outbound_tx,
            state: state_rx,
            cancel,
        }
    }

    fn set_state(&self, state: AgentState) {
        debug!(state = ?state, "agent state");
        self.state.send_replace(state);
    }

    async fn run(mut self) {
        self.set_state(AgentState::AwaitingId);
        let bus = self.bus.clone();
        let id = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("disposed while awaiting id");
                self.set_state(AgentState::Disposed);
                return;
            }
            id = bus.resolve_id() => id,
        };
        info!(id = %id, role = %self.config.role, "client id resolved");

        let mut attempt: u32 = 0;
        loop {
            self.set_state(AgentState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.config.url) => result,
            };

            match connected {
                Ok(transport) => {
                    attempt = 0;
                    info!(url = %self.config.url, "connected to broker");
                    if self.run_session(&id, transport).await == SessionEnd::Disposed {
                        break;
                    }
                    info!(url = %self.config.url, "connection to broker lost");
                }
                Err(e) => {
                    warn!(url = %self.config.url, attempt, error = %e, "connect attempt failed");
                }
            }

            attempt = attempt.saturating_add(1);
            if !self.config.reconnect.allows(attempt) {
                warn!(attempt, "reconnect attempts exhausted, giving up");
                break;
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt);
            self.set_state(AgentState::Reconnecting { attempt });
            info!(
                attempt,
                delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                "reconnecting"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.discard_outbound();
        self.set_state(AgentState::Disposed);
        info!(id = %id, "client agent disposed");
    }

    /// Announces on a fresh transport and relays until it goes away.
    async fn run_session(&mut self, id: &str, transport: Transport) -> SessionEnd {
        let Transport { sink, stream } = transport;
        let session_cancel = self.cancel.child_token();
        let (write_tx, write_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let write_handle = tokio::spawn(write_pump(sink, write_rx, session_cancel.clone()));

        // Payloads queued while disconnected are not replayed.
        self.discard_outbound();

        let announced = match Frame::announce(id, Some(self.config.role)).encode() {
            Ok(json) => write_tx
                .send(tungstenite::Message::Text(json.into()))
                .await
                .is_ok(),
            Err(e) => {
                warn!("failed to encode announce: {e}");
                false
            }
        };
        if !announced {
            session_cancel.cancel();
            let _ = write_handle.await;
            return self.session_end();
        }
        self.set_state(AgentState::Announced);

        let bus = self.bus.clone();
        let read = read_pump(
            stream,
            bus.as_ref(),
            write_tx.clone(),
            self.config.idle_timeout,
            session_cancel.clone(),
        );
        tokio::pin!(read);

        let end = loop {
            tokio::select! {
                () = &mut read => break SessionEnd::Lost,
                _ = self.cancel.cancelled() => break SessionEnd::Disposed,
                text = self.outbound.recv() => {
                    let Some(text) = text else {
                        break SessionEnd::Disposed;
                    };
                    if !self.send_payload(&write_tx, text).await {
                        break SessionEnd::Lost;
                    }
                }
            }
        };

        session_cancel.cancel();
        let _ = write_handle.await;
        self.discard_outbound();
        match end {
            SessionEnd::Lost => self.session_end(),
            SessionEnd::Disposed => SessionEnd::Disposed,
        }
    }

    async fn send_payload(&self, write_tx: &mpsc::Sender<tungstenite::Message>, text: String) -> bool {
        let json = match Frame::outbound(text.as_str()).encode() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode message: {e}");
                return true;
            }
        };
        if write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            return false;
        }
        self.bus.on_sent(text).await;
        true
    }

    fn session_end(&self) -> SessionEnd {
        if self.cancel.is_cancelled() {
            SessionEnd::Disposed
        } else {
            SessionEnd::Lost
        }
    }

    fn discard_outbound(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded payloads queued while not announced");
        }
    }
}

/// Owner's side of a running [`ClientAgent`]. Dropping it disposes the agent.
#[derive(Debug)]
pub struct ClientHandle {
    outbound: mpsc::Sender<String>,
    state: watch::Receiver<AgentState>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Queues a payload for the broker. Only accepted while announced.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SendError> {
        let state = self.state.borrow().clone();
        match state {
            AgentState::Announced => {}
            AgentState::Disposed => return Err(SendError::Disposed),
            _ => return Err(SendError::NotConnected),
        }
        self.outbound.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Disposed,
        })
    }

    pub fn state(&self) -> AgentState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Waits until the state satisfies `pred`. Returns the final state if the
    /// agent stopped first.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&AgentState) -> bool) -> AgentState {
        let reached = match self.state.wait_for(|s| pred(s)).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| self.state.borrow().clone())
    }

    /// Tears the agent down: closes the transport and stops reconnecting.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.state.borrow().is_disposed()
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use futures_util::{sink, stream};
    use relay_protocol::{ClientInfo, ClientRole};
    use tokio::time::Instant;

    use super::*;
    use crate::bus::{BusEndpoint, BusEvent, ChannelBus};
    use crate::transport::ConnectFuture;
    use crate::types::ReconnectConfig;
    use crate::ClientError;

    type WsResult = Result<tungstenite::Message, tungstenite::Error>;

    /// Broker side of one mock transport. Dropping it closes the transport.
    struct MockPeer {
        from_agent: mpsc::UnboundedReceiver<tungstenite::Message>,
        to_agent: mpsc::UnboundedSender<WsResult>,
    }

    impl MockPeer {
        async fn next_frame(&mut self) -> Frame {
            loop {
                match self.from_agent.recv().await {
                    Some(tungstenite::Message::Text(text)) => return Frame::decode(&text).unwrap(),
                    Some(_) => continue,
                    None => panic!("agent closed the transport"),
                }
            }
        }

        fn push(&self, frame: &Frame) {
            let text = frame.encode().unwrap();
            self.to_agent
                .send(Ok(tungstenite::Message::Text(text.into())))
                .unwrap();
        }
    }

    #[derive(Clone)]
    struct MockConnector {
        attempts: Arc<StdMutex<Vec<Instant>>>,
        refuse: Arc<AtomicBool>,
        peers: mpsc::UnboundedSender<MockPeer>,
    }

    impl Connector for MockConnector {
        fn connect<'a>(&'a self, _url: &'a str) -> ConnectFuture<'a> {
            Box::pin(async move {
                self.attempts.lock().unwrap().push(Instant::now());
                if self.refuse.load(Ordering::SeqCst) {
                    return Err(ClientError::WebSocket(tungstenite::Error::ConnectionClosed));
                }

                let (out_tx, out_rx) = mpsc::unbounded_channel::<tungstenite::Message>();
                let (in_tx, in_rx) = mpsc::unbounded_channel::<WsResult>();
                let _ = self.peers.send(MockPeer {
                    from_agent: out_rx,
                    to_agent: in_tx,
                });

                let sink = sink::unfold(
                    out_tx,
                    |tx: mpsc::UnboundedSender<tungstenite::Message>, msg: tungstenite::Message| async move {
                        tx.send(msg)
                            .map_err(|_| tungstenite::Error::ConnectionClosed)?;
                        Ok::<_, tungstenite::Error>(tx)
                    },
                );
                let stream = stream::unfold(in_rx, |mut rx| async move {
                    rx.recv().await.map(|msg| (msg, rx))
                });
                Ok(Transport {
                    sink: Box::pin(sink),
                    stream: Box::pin(stream),
                })
            })
        }
    }

    struct Harness {
        handle: ClientHandle,
        endpoint: BusEndpoint,
        attempts: Arc<StdMutex<Vec<Instant>>>,
        refuse: Arc<AtomicBool>,
        peers: mpsc::UnboundedReceiver<MockPeer>,
    }

    impl Harness {
        fn start(config: ClientConfig) -> Self {
            let (peers_tx, peers_rx) = mpsc::unbounded_channel();
            let connector = MockConnector {
                attempts: Arc::default(),
                refuse: Arc::default(),
                peers: peers_tx,
            };
            let attempts = connector.attempts.clone();
            let refuse = connector.refuse.clone();
            let (bus, endpoint) = ChannelBus::new(16);
            let handle = ClientAgent::spawn_with(config, Arc::new(bus), connector);
            Self {
                handle,
                endpoint,
                attempts,
                refuse,
                peers: peers_rx,
            }
        }

        /// Starts an agent and answers its id request.
        async fn started(config: ClientConfig, id: &str) -> Self {
            let mut harness = Self::start(config);
            harness
                .endpoint
                .id_requests
                .recv()
                .await
                .unwrap()
                .respond(id);
            harness
        }

        async fn next_peer(&mut self) -> MockPeer {
            self.peers.recv().await.unwrap()
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    fn host_config() -> ClientConfig {
        ClientConfig::host("ws://mock")
    }

    #[tokio::test(start_paused = true)]
    async fn announce_carries_id_and_role() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        assert_eq!(
            peer.next_frame().await,
            Frame::announce("editor-1", Some(ClientRole::Host))
        );
        assert_eq!(
            h.handle.wait_for(|s| *s == AgentState::Announced).await,
            AgentState::Announced
        );

        let mut d = Harness::started(ClientConfig::dispatcher("ws://mock"), "dispatcher-1").await;
        let mut peer = d.next_peer().await;
        assert_eq!(
            peer.next_frame().await,
            Frame::announce("dispatcher-1", Some(ClientRole::Dispatcher))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broker_message_is_forwarded_then_acked() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;

        peer.push(&Frame::message("ping from dispatcher", "7"));
        assert_eq!(
            h.endpoint.events.recv().await,
            Some(BusEvent::Message {
                text: "ping from dispatcher".into(),
                message_id: Some("7".into()),
            })
        );
        assert_eq!(peer.next_frame().await, Frame::ack("7"));
    }

    #[tokio::test(start_paused = true)]
    async fn local_payload_goes_out_and_is_reported() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;
        h.handle.wait_for(|s| *s == AgentState::Announced).await;

        h.handle.send("payload").unwrap();
        assert_eq!(peer.next_frame().await, Frame::outbound("payload"));
        assert_eq!(
            h.endpoint.events.recv().await,
            Some(BusEvent::Sent("payload".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn roster_reaches_bus() {
        let mut h =
            Harness::started(ClientConfig::dispatcher("ws://mock"), "dispatcher-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;

        let roster = vec![
            ClientInfo::new("dispatcher-1", ClientRole::Dispatcher),
            ClientInfo::new("editor-1", ClientRole::Host),
        ];
        peer.push(&Frame::client_list(roster.clone()));
        assert_eq!(h.endpoint.events.recv().await, Some(BusEvent::Roster(roster)));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;
        h.handle.wait_for(|s| *s == AgentState::Announced).await;

        drop(peer);
        let lost_at = Instant::now();
        assert_eq!(
            h.handle
                .wait_for(|s| matches!(s, AgentState::Reconnecting { .. }))
                .await,
            AgentState::Reconnecting { attempt: 1 }
        );

        tokio::time::sleep(Duration::from_secs(5) - Duration::from_millis(1)).await;
        assert_eq!(h.attempt_count(), 1);

        let mut peer = h.next_peer().await;
        let reconnected_at = h.attempts.lock().unwrap()[1];
        assert!(reconnected_at - lost_at >= Duration::from_secs(5));
        assert_eq!(
            peer.next_frame().await,
            Frame::announce("editor-1", Some(ClientRole::Host))
        );

        // Stays on the new transport.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(h.attempt_count(), 2);
        assert_eq!(h.handle.state(), AgentState::Announced);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_broker_keeps_connection_open() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;
        h.handle.wait_for(|s| *s == AgentState::Announced).await;

        // The peer never answers; the agent only pings.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.handle.state(), AgentState::Announced);
        assert_eq!(h.attempt_count(), 1);

        let mut pings = 0;
        while let Ok(msg) = peer.from_agent.try_recv() {
            if matches!(msg, tungstenite::Message::Ping(_)) {
                pings += 1;
            }
        }
        assert!(pings >= 7, "expected keepalive pings, got {pings}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_reconnects_when_configured() {
        let config = host_config().with_idle_timeout(Duration::from_secs(30));
        let mut h = Harness::started(config, "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;

        assert_eq!(
            h.handle
                .wait_for(|s| matches!(s, AgentState::Reconnecting { .. }))
                .await,
            AgentState::Reconnecting { attempt: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn payload_queued_before_loss_is_not_replayed() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;
        h.handle.wait_for(|s| *s == AgentState::Announced).await;

        // Queued while still announced, but the transport is already gone.
        drop(peer);
        h.handle.send("stale").unwrap();

        h.handle
            .wait_for(|s| matches!(s, AgentState::Reconnecting { .. }))
            .await;
        let mut peer = h.next_peer().await;
        assert_eq!(
            peer.next_frame().await,
            Frame::announce("editor-1", Some(ClientRole::Host))
        );
        h.handle.wait_for(|s| *s == AgentState::Announced).await;

        h.handle.send("fresh").unwrap();
        assert_eq!(peer.next_frame().await, Frame::outbound("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_keep_retrying() {
        let mut h = Harness::start(host_config());
        h.refuse.store(true, Ordering::SeqCst);
        h.endpoint.id_requests.recv().await.unwrap().respond("editor-1");

        h.handle
            .wait_for(|s| *s == AgentState::Reconnecting { attempt: 3 })
            .await;
        assert_eq!(h.attempt_count(), 3);

        h.refuse.store(false, Ordering::SeqCst);
        let mut peer = h.next_peer().await;
        peer.next_frame().await;
        h.handle.wait_for(|s| *s == AgentState::Announced).await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let config = host_config().with_reconnect(
            ReconnectConfig::fixed(Duration::from_secs(1)).with_max_attempts(3),
        );
        let mut h = Harness::start(config);
        h.refuse.store(true, Ordering::SeqCst);
        h.endpoint.id_requests.recv().await.unwrap().respond("editor-1");

        assert_eq!(
            h.handle.wait_for(AgentState::is_disposed).await,
            AgentState::Disposed
        );
        assert_eq!(h.attempt_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_while_awaiting_id() {
        let mut h = Harness::start(host_config());
        let _pending = h.endpoint.id_requests.recv().await.unwrap();
        assert_eq!(h.handle.state(), AgentState::AwaitingId);

        h.handle.dispose();
        h.handle.wait_for(AgentState::is_disposed).await;
        assert_eq!(h.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_while_reconnecting() {
        let mut h = Harness::start(host_config());
        h.refuse.store(true, Ordering::SeqCst);
        h.endpoint.id_requests.recv().await.unwrap().respond("editor-1");
        h.handle
            .wait_for(|s| matches!(s, AgentState::Reconnecting { .. }))
            .await;

        h.handle.dispose();
        h.handle.wait_for(AgentState::is_disposed).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_closes_transport() {
        let mut h = Harness::started(host_config(), "editor-1").await;
        let mut peer = h.next_peer().await;
        peer.next_frame().await;

        h.handle.dispose();
        let mut closed = false;
        while let Some(msg) = peer.from_agent.recv().await {
            if matches!(msg, tungstenite::Message::Close(_)) {
                closed = true;
            }
        }
        assert!(closed);
        h.handle.wait_for(AgentState::is_disposed).await;
        assert_eq!(h.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_disposes() {
        let h = Harness::start(host_config());
        let mut state = h.handle.subscribe();
        drop(h.handle);

        let _ = state.wait_for(AgentState::is_disposed).await;
        assert!(state.borrow().is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_returns_final_state_once_agent_stops() {
        let mut h = Harness::start(host_config());
        let _pending = h.endpoint.id_requests.recv().await.unwrap();
        h.handle.dispose();

        // Never announced, so the wait ends when the agent task does.
        assert_eq!(
            h.handle.wait_for(|s| *s == AgentState::Announced).await,
            AgentState::Disposed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_announced() {
        let mut h = Harness::start(host_config());
        h.refuse.store(true, Ordering::SeqCst);
        assert_eq!(h.handle.send("early"), Err(SendError::NotConnected));

        h.endpoint.id_requests.recv().await.unwrap().respond("editor-1");
        h.handle
            .wait_for(|s| matches!(s, AgentState::Reconnecting { .. }))
            .await;
        assert_eq!(h.handle.send("x"), Err(SendError::NotConnected));

        h.handle.dispose();
        h.handle.wait_for(AgentState::is_disposed).await;
        assert_eq!(h.handle.send("late"), Err(SendError::Disposed));
        assert!(h.handle.is_disposed());
    }
}
