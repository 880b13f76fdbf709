//! Public configuration and state types for the client agent.

use std::time::Duration;

use rand::Rng;
use relay_protocol::ClientRole;
use relay_protocol::constants::{DEFAULT_BROKER_URL, DEFAULT_RECONNECT_DELAY};

/// Lifecycle of a [`ClientAgent`](crate::ClientAgent).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    /// Constructed, not yet running.
    Uninitialized,
    /// Waiting for the hosting process to supply an id.
    AwaitingId,
    /// Opening a transport to the broker.
    Connecting,
    /// `announce` sent; payloads flow in both directions.
    Announced,
    /// Transport lost, waiting before the next connect attempt.
    Reconnecting { attempt: u32 },
    /// Torn down; terminal.
    Disposed,
}

impl AgentState {
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

/// Shortest pause between reconnect attempts.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(50);

/// Reconnect policy.
///
/// The default reproduces the classic behavior: a fixed 5 second pause,
/// retried forever.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Random spread applied to each delay, as a fraction (0.25 = ±25%).
    pub jitter: f64,
    /// Consecutive failed attempts after which the agent gives up.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Same delay every time, no jitter, unbounded.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// 250ms doubling up to 15s, with ±25% jitter.
    pub fn exponential() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            jitter: 0.25,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Calculates the delay for a given attempt number (1-based), never
    /// shorter than [`MIN_RECONNECT_DELAY`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let mut delay = secs.min(self.max_delay.as_secs_f64());
        if self.jitter > 0.0 {
            let offset: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            delay += delay * self.jitter * offset;
        }
        // NaN and negative values land on the floor; overflow falls back to the cap.
        let delay = delay.max(MIN_RECONNECT_DELAY.as_secs_f64());
        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }
}

/// Client agent configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker endpoint, e.g. `ws://127.0.0.1:8080`.
    pub url: String,
    /// Role announced to the broker.
    pub role: ClientRole,
    pub reconnect: ReconnectConfig,
    /// Drop the transport if nothing arrives for this long. `None` keeps a
    /// quiet transport open until it closes or errors.
    pub idle_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Editor-side agent.
    pub fn host(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: ClientRole::Host,
            reconnect: ReconnectConfig::default(),
            idle_timeout: None,
        }
    }

    /// Dispatcher-side agent.
    pub fn dispatcher(url: impl Into<String>) -> Self {
        Self {
            role: ClientRole::Dispatcher,
            ..Self::host(url)
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::host(DEFAULT_BROKER_URL)
    }
}
