//! Plain WebSocket transport.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use super::{Framing, Outbound, Transport, TransportEvent, TransportHandle, TransportPeer};

pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Raw WebSocket to `<base>/ws/exam-workflow`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &Url) -> TransportHandle {
        let (handle, peer) = TransportHandle::pair();
        let url = url.clone();
        let timeout = self.connect_timeout;

        tokio::spawn(async move {
            let url = match super::websocket_scheme(&url) {
                Ok(url) => url,
                Err(e) => return peer.fail(e),
            };
            match connect(&url, timeout).await {
                Ok(socket) => {
                    if peer.emit(TransportEvent::Opened) {
                        pump(socket, peer, Framing::Raw).await;
                    }
                }
                Err(e) => peer.fail(e),
            }
        });

        handle
    }
}

/// Performs the WebSocket handshake within `timeout`.
pub(crate) async fn connect(url: &Url, timeout: Duration) -> Result<Socket, String> {
    debug!(url = %url, "opening websocket");

    let (socket, response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| format!("connection timed out after {}s", timeout.as_secs()))?
        .map_err(|e| format!("failed to connect to {}: {}", url, e))?;

    debug!(status = %response.status(), "websocket handshake complete");
    Ok(socket)
}

/// Moves messages between an open socket and the peer until either side closes.
pub(crate) async fn pump(socket: Socket, mut peer: TransportPeer, framing: Framing) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = peer.outbound.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    let payload = match framing.encode(text) {
                        Ok(payload) => payload,
                        Err(e) => return peer.fail(e.to_string()),
                    };
                    if let Err(e) = sink.send(Message::Text(payload.into())).await {
                        return peer.fail(format!("send failed: {}", e));
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("closing websocket");
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = peer.emit(TransportEvent::Closed(None));
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !framing.deliver(text.as_str().to_owned(), &peer.events) {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if !framing.deliver(text, &peer.events) {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
                    debug!(reason = ?reason, "websocket closed by server");
                    let _ = peer.emit(TransportEvent::Closed(reason));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return peer.fail(e.to_string()),
                None => {
                    let _ = peer.emit(TransportEvent::Closed(None));
                    return;
                }
            },
        }
    }
}
