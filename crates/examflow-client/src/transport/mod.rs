//! Duplex message transports.
//!
//! A [`Transport`] opens one connection per call and hands back a
//! [`TransportHandle`]. Opening never fails synchronously: the network work
//! runs on a spawned task and every failure arrives as
//! [`TransportEvent::Error`] followed by [`TransportEvent::Closed`]. Callers
//! must treat a fresh handle as possibly already dead.

mod sockjs;
mod websocket;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use examflow_protocol::destinations::ENDPOINT_PATH;
use examflow_protocol::sockjs::{SockJsFrame, decode_frame, encode_messages};
use examflow_protocol::ProtocolResult;

pub use sockjs::SockJsTransport;
pub use websocket::WebSocketTransport;

/// Low-level lifecycle and data events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is ready to carry messages.
    Opened,
    /// One text message.
    Message(String),
    /// Something went wrong; a `Closed` follows.
    Error(String),
    /// The connection is gone, with the peer's reason when known.
    Closed(Option<String>),
}

/// Instructions to the transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Caller side of one connection.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport-task side of one connection.
#[derive(Debug)]
pub struct TransportPeer {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandle {
    /// Creates a connected handle/peer pair.
    pub fn pair() -> (TransportHandle, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            TransportHandle {
                outbound: outbound_tx,
                events: events_rx,
            },
            TransportPeer {
                outbound: outbound_rx,
                events: events_tx,
            },
        )
    }

    /// Queues a text message. Returns false when the transport is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outbound.send(Outbound::Text(text.into())).is_ok()
    }

    /// Asks the transport to close.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Waits for the next event. `None` means the transport task exited.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl TransportPeer {
    /// Reports an event. Returns false when nobody is listening any more.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Reports a failure followed by the close that always accompanies it.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        let _ = self.events.send(TransportEvent::Error(error.clone()));
        let _ = self.events.send(TransportEvent::Closed(Some(error)));
    }
}

/// Opens connections to a broker endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Starts connecting to `url` and returns immediately.
    fn open(&self, url: &Url) -> TransportHandle;
}

/// Transport selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain WebSocket to the endpoint.
    WebSocket,
    /// SockJS session with XHR polling fallback.
    #[default]
    SockJs,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::SockJs => "sockjs",
        }
    }

    /// Builds the transport for this kind.
    pub fn build(self, connect_timeout: Duration) -> Arc<dyn Transport> {
        match self {
            Self::WebSocket => Arc::new(WebSocketTransport::new(connect_timeout)),
            Self::SockJs => Arc::new(SockJsTransport::new(connect_timeout)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "sockjs" => Ok(Self::SockJs),
            other => Err(format!(
                "unknown transport {:?} (expected websocket or sockjs)",
                other
            )),
        }
    }
}

/// Appends the exam-workflow endpoint path to a server base URL.
pub fn endpoint_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), ENDPOINT_PATH);
    url.set_path(&path);
    url
}

/// Rewrites `http`/`https` to `ws`/`wss`.
pub(crate) fn websocket_scheme(url: &Url) -> Result<Url, String> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(format!("unsupported URL scheme {:?}", other)),
    };
    let mut url = url.clone();
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot use {} scheme for {}", scheme, url))?;
    Ok(url)
}

/// How text is wrapped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// Messages are sent as they are; the socket opening means ready.
    Raw,
    /// SockJS frames; ready on the `o` frame.
    SockJs,
}

impl Framing {
    pub(crate) fn encode(&self, text: String) -> ProtocolResult<String> {
        match self {
            Self::Raw => Ok(text),
            Self::SockJs => encode_messages(&[text]),
        }
    }

    /// Unwraps inbound text into events. Returns false when the session ended.
    pub(crate) fn deliver(&self, raw: String, events: &mpsc::UnboundedSender<TransportEvent>) -> bool {
        match self {
            Self::Raw => events.send(TransportEvent::Message(raw)).is_ok(),
            Self::SockJs => match decode_frame(&raw) {
                Ok(SockJsFrame::Open) => events.send(TransportEvent::Opened).is_ok(),
                Ok(SockJsFrame::HeartBeat) => {
                    debug!("sockjs heart-beat");
                    !events.is_closed()
                }
                Ok(SockJsFrame::Messages(messages)) => messages
                    .into_iter()
                    .all(|message| events.send(TransportEvent::Message(message)).is_ok()),
                Ok(SockJsFrame::Close { code, reason }) => {
                    debug!(code, reason = %reason, "sockjs session closed by server");
                    let _ = events.send(TransportEvent::Closed(Some(format!("{} {}", code, reason))));
                    false
                }
                Err(e) => {
                    warn!(error = %e, "dropping undecodable sockjs frame");
                    !events.is_closed()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_appended_to_base_path() {
        let base = Url::parse("https://clinic.example.com/api/").unwrap();
        assert_eq!(
            endpoint_url(&base).as_str(),
            "https://clinic.example.com/api/ws/exam-workflow"
        );

        let bare = Url::parse("http://localhost:8080").unwrap();
        assert_eq!(
            endpoint_url(&bare).as_str(),
            "http://localhost:8080/ws/exam-workflow"
        );
    }

    #[test]
    fn http_schemes_become_websocket_schemes() {
        let plain = Url::parse("http://localhost:8080/ws/exam-workflow").unwrap();
        assert_eq!(websocket_scheme(&plain).unwrap().scheme(), "ws");

        let tls = Url::parse("https://clinic.example.com/ws/exam-workflow").unwrap();
        assert_eq!(websocket_scheme(&tls).unwrap().scheme(), "wss");

        let ftp = Url::parse("ftp://clinic.example.com/").unwrap();
        assert!(websocket_scheme(&ftp).is_err());
    }

    #[test]
    fn transport_kind_parses() {
        assert_eq!("sockjs".parse::<TransportKind>().unwrap(), TransportKind::SockJs);
        assert_eq!("WebSocket".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::default(), TransportKind::SockJs);
    }

    #[test]
    fn sockjs_framing_unwraps_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(Framing::SockJs.deliver("o".to_string(), &tx));
        assert!(Framing::SockJs.deliver(r#"a["one","two"]"#.to_string(), &tx));
        assert!(!Framing::SockJs.deliver(r#"c[3000,"Go away!"]"#.to_string(), &tx));

        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Opened);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Message("one".into()));
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Message("two".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Closed(Some("3000 Go away!".into()))
        );
    }

    #[test]
    fn sockjs_framing_wraps_outbound_text() {
        assert_eq!(Framing::SockJs.encode("\n".to_string()).unwrap(), r#"["\n"]"#);
        assert_eq!(Framing::Raw.encode("\n".to_string()).unwrap(), "\n");
    }
}
