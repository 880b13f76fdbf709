use std::time::Duration;

/// Port the broker listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8080;

/// Endpoint clients dial when no URL is configured.
pub const DEFAULT_BROKER_URL: &str = "ws://127.0.0.1:8080";

/// Ids starting with this prefix announce as dispatchers when the
/// `announce` frame carries no explicit role.
pub const DISPATCHER_ID_PREFIX: &str = "dispatcher-";

/// Prefix used for generated editor-side ids.
pub const HOST_ID_PREFIX: &str = "editor-";

/// How often the broker pings each connection.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Read deadline: if nothing (pong, frame) arrives within this window the
/// connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum text frame size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Delay between reconnect attempts in the reference client behavior.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
