//! How the agent opens a connection to the broker.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream, StreamExt};
use relay_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tokio_tungstenite::tungstenite;

use crate::ClientError;

pub type FrameSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;
pub type FrameStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

/// Both halves of an open connection.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// A boxed future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Transport, ClientError>> + Send + 'a>>;

/// Opens transports to the broker.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a>;
}

/// Plain WebSocket connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect<'a>(&'a self, url: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
            let (sink, stream) = ws_stream.split();
            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}
