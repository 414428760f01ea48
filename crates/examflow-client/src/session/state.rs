//! Connection state machine.
//!
//! ```text
//! Disconnected ──start──▶ Connecting{0} ──connected──▶ Connected
//!      ▲                      │  ▲                         │
//!      │                 lost │  │ retry                   │ lost
//!  disconnect                 ▼  │                         ▼
//!  (any state)            Reconnecting{n} ◀────────────────┘
//!                             │
//!                  n > budget ▼
//!                           Failed ──start──▶ Connecting{0}
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Initial state, and the state after `disconnect()`.
    Disconnected,
    /// Transport opened, waiting for the broker to accept the handshake.
    /// `attempt` is 0 for the first connect and the reconnect number after.
    Connecting { attempt: u32 },
    /// Handshake acknowledged; subscribe and publish are valid.
    Connected,
    /// Waiting out the delay before reconnect `attempt`.
    Reconnecting { attempt: u32 },
    /// Gave up; only an explicit `connect()` leaves this state.
    Failed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// True while a connection task is alive for this session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Connected | Self::Reconnecting { .. }
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting { attempt: 0 } => f.write_str("connecting"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {})", attempt),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Fixed-delay reconnect budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

/// What to do after a connection was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Wait `delay`, then make reconnect `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted after `attempts` reconnects.
    GiveUp { attempts: u32 },
}

/// The transition table. Pure; the connection task drives it.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
    policy: ReconnectPolicy,
}

impl Lifecycle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: SessionState::Disconnected,
            policy,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Reconnect attempts made since the last successful handshake.
    pub fn attempts(&self) -> u32 {
        match self.state {
            SessionState::Connecting { attempt } | SessionState::Reconnecting { attempt } => {
                attempt
            }
            _ => 0,
        }
    }

    /// Begins a fresh connect. Returns false if a connection is already live.
    pub fn start(&mut self) -> bool {
        if self.state.is_active() {
            return false;
        }
        self.state = SessionState::Connecting { attempt: 0 };
        true
    }

    /// The broker accepted the handshake; the attempt counter resets.
    pub fn connected(&mut self) {
        self.state = SessionState::Connected;
    }

    /// The transport dropped or errored outside of `disconnect()`.
    pub fn connection_lost(&mut self) -> Reconnect {
        let previous = self.attempts();
        let next = previous + 1;
        if next > self.policy.max_attempts {
            self.state = SessionState::Failed;
            Reconnect::GiveUp { attempts: previous }
        } else {
            self.state = SessionState::Reconnecting { attempt: next };
            Reconnect::Retry {
                attempt: next,
                delay: self.policy.delay,
            }
        }
    }

    /// The reconnect delay elapsed.
    pub fn retry(&mut self) {
        if let SessionState::Reconnecting { attempt } = self.state {
            self.state = SessionState::Connecting { attempt };
        }
    }

    /// The broker refused the session; no retry.
    pub fn reject(&mut self) {
        self.state = SessionState::Failed;
    }

    /// Explicit teardown, valid from any state.
    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
    }
}
