//! Session error types.

use std::time::Duration;

use examflow_protocol::CommandKind;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures of the session itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The operation needs a connected session.
    #[error("not connected")]
    NotConnected,

    /// A command of the same kind is still waiting for its reply.
    #[error("a {0} command is already awaiting its reply")]
    CommandInFlight(CommandKind),

    /// Socket-level failure; recovered by reconnecting.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker sent an ERROR frame.
    #[error("broker error: {0}")]
    Protocol(String),

    /// The peer stopped sending heart-beats.
    #[error("no data from broker for {}s", .0.as_secs())]
    HeartBeatTimeout(Duration),

    /// Reconnect budget spent.
    #[error("connection lost, gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The session could not be started.
    #[error("cannot start session: {0}")]
    Setup(String),
}

impl SessionError {
    /// Whether the session stopped for good and needs an explicit `connect()`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::ReconnectExhausted { .. } | Self::Setup(_)
        )
    }
}

/// A published command that did not succeed.
///
/// Delivered on the errors subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Text sent by the server on the errors destination.
    #[error("{0}")]
    Rejected(String),

    /// No reply arrived in time.
    #[error("no reply to {kind} within {}s", .after.as_secs())]
    TimedOut { kind: CommandKind, after: Duration },

    /// The connection dropped before the command was sent or answered.
    #[error("{0} was not answered: connection lost")]
    Undelivered(CommandKind),
}

/// A payload that could not be decoded for its subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot decode {target}: {reason}")]
pub struct DecodeError {
    pub target: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(target: &'static str, reason: impl ToString) -> Self {
        Self {
            target,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors() {
        assert!(SessionError::ReconnectExhausted { attempts: 5 }.is_terminal());
        assert!(SessionError::Protocol("bad token".into()).is_terminal());
        assert!(!SessionError::Transport("reset".into()).is_terminal());
        assert!(!SessionError::NotConnected.is_terminal());
    }

    #[test]
    fn messages() {
        assert_eq!(
            SessionError::CommandInFlight(CommandKind::TakeNext).to_string(),
            "a take-next command is already awaiting its reply"
        );
        assert_eq!(
            CommandError::TimedOut {
                kind: CommandKind::QueueSize,
                after: Duration::from_secs(15)
            }
            .to_string(),
            "no reply to queue-size within 15s"
        );
        assert_eq!(
            CommandError::Rejected("Queue is empty".into()).to_string(),
            "Queue is empty"
        );
    }
}
