//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Command line is not a STOMP command.
    #[error("unknown STOMP command: {0:?}")]
    UnknownCommand(String),

    /// Header line without a colon, or with an invalid escape.
    #[error("malformed header: {0:?}")]
    MalformedHeader(String),

    /// `content-length` header is not a number.
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// Body declared by `content-length` is not followed by a NUL octet.
    #[error("frame body is not terminated by NUL")]
    MissingTerminator,

    /// Frame or body is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// `heart-beat` header is not `<cx>,<cy>`.
    #[error("invalid heart-beat header: {0:?}")]
    InvalidHeartBeat(String),

    /// SockJS frame could not be understood.
    #[error("invalid SockJS frame: {0}")]
    SockJs(String),

    /// Failed to serialize or deserialize JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
