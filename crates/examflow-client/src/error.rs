//! Client error types.

use std::fmt;

use crate::session::{CommandError, SessionError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// IO error.
    Io(std::io::Error),
    /// The session could not be established.
    Connection(String),
    /// The session refused an operation.
    Session(SessionError),
    /// The server rejected a command.
    Command(CommandError),
    /// No reply in time.
    Timeout(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Session(err) => write!(f, "session error: {}", err),
            Self::Command(err) => write!(f, "command failed: {}", err),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Session(err) => Some(err),
            Self::Command(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<CommandError> for ClientError {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}
