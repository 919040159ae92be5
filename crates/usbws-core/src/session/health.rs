//! Keepalive policy.
//!
//! USB/IP has no heartbeat of its own: an attached device can sit idle for
//! hours.  To notice a dead peer (laptop lid closed, NAT entry expired) the
//! event loop periodically asks the [`HealthMonitor`] what to do with each
//! session.  The monitor looks at how long the peer has been silent:
//!
//! ```text
//!   idle:  0 ──────────── interval ──────────── interval + timeout ──▶
//!          nothing        ping (once)            discontinue + close
//! ```
//!
//! Any binary frame or pong from the peer resets the idle clock.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::error::DiscontinueReason;
use super::Session;
use crate::protocol::{CLIENT_MARGIN, PING_PONG_TIMEOUT};

/// What the event loop should do with a session after a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Leave the session alone.
    None,
    /// A ping has been queued on the session.
    Ping,
    /// The session is discontinued; close the connection.
    Close,
}

/// Idle/keepalive checker shared by every session of one event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitor {
    /// `None` disables keepalive.
    interval: Option<Duration>,
    timeout: Duration,
}

impl HealthMonitor {
    /// Monitor for the daemon side.  A zero `interval` disables keepalive.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: (!interval.is_zero()).then_some(interval),
            timeout: PING_PONG_TIMEOUT,
        }
    }

    /// Monitor for the client side: the interval is stretched by
    /// [`CLIENT_MARGIN`] so that the daemon normally pings first.
    pub fn for_client(interval: Duration) -> Self {
        if interval.is_zero() {
            Self::disabled()
        } else {
            Self::new(interval + CLIENT_MARGIN)
        }
    }

    pub fn disabled() -> Self {
        Self {
            interval: None,
            timeout: PING_PONG_TIMEOUT,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Checks one session at time `now` and applies the policy to it.
    ///
    /// Rules, first match wins:
    ///
    /// 1. Discontinued session → [`HealthAction::Close`].
    /// 2. Keepalive disabled → [`HealthAction::None`].
    /// 3. Idle for `interval + timeout` or longer → discontinue with
    ///    [`DiscontinueReason::KeepaliveTimeout`], then `Close`.
    /// 4. Idle for `interval` or longer with no ping outstanding → queue a
    ///    ping, [`HealthAction::Ping`].
    pub fn check(&self, session: &Session, now: Instant) -> HealthAction {
        if !session.is_active() {
            return HealthAction::Close;
        }
        let Some(interval) = self.interval else {
            return HealthAction::None;
        };

        let idle = session.idle_for(now);
        if idle >= interval + self.timeout {
            info!(
                session = session.id(),
                idle_secs = idle.as_secs(),
                "keepalive timeout"
            );
            session.discontinue(DiscontinueReason::KeepaliveTimeout);
            return HealthAction::Close;
        }
        if idle >= interval && !session.ping_outstanding() {
            debug!(session = session.id(), idle_secs = idle.as_secs(), "idle; pinging");
            session.request_ping();
            return HealthAction::Ping;
        }
        HealthAction::None
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(crate::protocol::PING_PONG_DEFAULT)
    }
}
