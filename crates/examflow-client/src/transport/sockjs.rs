//! SockJS transport: WebSocket first, XHR polling when the handshake fails.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::websocket;
use super::{Framing, Outbound, Transport, TransportEvent, TransportHandle, TransportPeer};

/// Connects to a SockJS endpoint.
#[derive(Debug, Clone)]
pub struct SockJsTransport {
    connect_timeout: Duration,
}

impl SockJsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for SockJsTransport {
    fn open(&self, url: &Url) -> TransportHandle {
        let (handle, peer) = TransportHandle::pair();
        let session = match session_url(url) {
            Ok(session) => session,
            Err(e) => {
                peer.fail(e);
                return handle;
            }
        };
        let timeout = self.connect_timeout;

        tokio::spawn(async move {
            let ws_url = session
                .join("websocket")
                .map_err(|e| e.to_string())
                .and_then(|url| super::websocket_scheme(&url));

            let failure = match ws_url {
                Ok(ws_url) => match websocket::connect(&ws_url, timeout).await {
                    Ok(socket) => {
                        websocket::pump(socket, peer, Framing::SockJs).await;
                        return;
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            info!(error = %failure, "sockjs websocket unavailable, falling back to xhr polling");
            run_xhr(session, timeout, peer).await;
        });

        handle
    }
}

/// `<endpoint>/<server-id>/<session-id>/` with a trailing slash so that
/// `join` appends the transport name.
fn session_url(endpoint: &Url) -> Result<Url, String> {
    let id = Uuid::new_v4();
    let server = id.as_u128() % 1000;
    let session = id.simple();
    let path = format!(
        "{}/{:03}/{}/",
        endpoint.path().trim_end_matches('/'),
        server,
        session
    );
    let mut url = endpoint.clone();
    url.set_path(&path);
    if url.cannot_be_a_base() {
        return Err(format!("{} cannot be used as a sockjs endpoint", endpoint));
    }
    Ok(url)
}

async fn run_xhr(session: Url, timeout: Duration, mut peer: TransportPeer) {
    let client = match reqwest::Client::builder().connect_timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return peer.fail(format!("failed to build http client: {}", e)),
    };
    let (receive_url, send_url) = match (session.join("xhr"), session.join("xhr_send")) {
        (Ok(receive), Ok(send)) => (receive, send),
        _ => return peer.fail(format!("invalid sockjs session url {}", session)),
    };

    let mut poller = tokio::spawn(poll(client.clone(), receive_url, peer.events.clone()));

    loop {
        tokio::select! {
            _ = &mut poller => return,
            outbound = peer.outbound.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    let body = match Framing::SockJs.encode(text) {
                        Ok(body) => body,
                        Err(e) => {
                            poller.abort();
                            return peer.fail(e.to_string());
                        }
                    };
                    let sent = client
                        .post(send_url.clone())
                        .header("content-type", "text/plain;charset=UTF-8")
                        .body(body)
                        .send()
                        .await
                        .and_then(|response| response.error_for_status());
                    if let Err(e) = sent {
                        poller.abort();
                        return peer.fail(format!("xhr_send failed: {}", e));
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("closing xhr session");
                    poller.abort();
                    let _ = peer.emit(TransportEvent::Closed(None));
                    return;
                }
            },
        }
    }
}

/// Long-polls `xhr` and forwards every frame until the session ends.
async fn poll(
    client: reqwest::Client,
    url: Url,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let response = client
            .post(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status());

        let body = match response {
            Ok(response) => response.text().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => {
                for frame in body.lines().filter(|line| !line.is_empty()) {
                    if !Framing::SockJs.deliver(frame.to_string(), &events) {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "xhr poll failed");
                let message = format!("xhr poll failed: {}", e);
                let _ = events.send(TransportEvent::Error(message.clone()));
                let _ = events.send(TransportEvent::Closed(Some(message)));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_has_server_and_session_segments() {
        let endpoint = Url::parse("http://localhost:8080/ws/exam-workflow").unwrap();
        let session = session_url(&endpoint).unwrap();

        let segments: Vec<_> = session.path_segments().unwrap().collect();
        assert_eq!(segments[0], "ws");
        assert_eq!(segments[1], "exam-workflow");
        assert_eq!(segments[2].len(), 3);
        assert!(segments[2].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(segments[3].len(), 32);
        assert_eq!(segments[4], "");

        let websocket = session.join("websocket").unwrap();
        assert!(websocket.path().ends_with("/websocket"));
        assert!(websocket.path().starts_with("/ws/exam-workflow/"));
    }
}
