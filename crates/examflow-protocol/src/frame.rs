//! STOMP frame model.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::heartbeat::HeartBeat;

/// Versions offered in the CONNECT frame, newest first.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// STOMP frame commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCommand {
    // client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl FrameCommand {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED frames carry their header values unescaped.
    pub fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for FrameCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// A single STOMP frame.
///
/// Headers keep their wire order. When a header repeats, the first
/// occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: FrameCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    pub fn new(command: FrameCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Builder: append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder: set the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// CONNECT frame carrying a bearer credential and the heart-beat offer.
    pub fn connect(bearer: &str, heart_beat: HeartBeat) -> Self {
        Self::new(FrameCommand::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", heart_beat.to_header())
            .header("Authorization", format!("Bearer {}", bearer))
    }

    /// SEND frame to an application destination.
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(FrameCommand::Send)
            .header("destination", destination)
            .body(body)
    }

    /// SUBSCRIBE frame.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(FrameCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    /// UNSUBSCRIBE frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(FrameCommand::Unsubscribe).header("id", id)
    }

    /// DISCONNECT frame.
    pub fn disconnect() -> Self {
        Self::new(FrameCommand::Disconnect)
    }

    /// Returns the first value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `destination` header.
    pub fn destination(&self) -> Option<&str> {
        self.get("destination")
    }

    /// `subscription` header of a MESSAGE frame.
    pub fn subscription(&self) -> Option<&str> {
        self.get("subscription")
    }

    /// Human-readable error text of an ERROR frame.
    ///
    /// Brokers put a short summary in `message` and details in the body.
    pub fn error_text(&self) -> String {
        match (self.get("message"), self.body.trim()) {
            (Some(message), "") => message.to_string(),
            (Some(message), body) => format!("{}: {}", message, body),
            (None, "") => "broker reported an error".to_string(),
            (None, body) => body.to_string(),
        }
    }
}
