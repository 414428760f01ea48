//! In-memory transport and a scripted broker for session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use url::Url;

use examflow_protocol::{Frame, FrameCommand, FrameDecoder, Inbound, encode_frame};

use super::{Outbound, Transport, TransportEvent, TransportHandle, TransportPeer};

/// Hands every opened connection to the paired [`MockBroker`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    opens: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<MockConnection>,
}

/// Test side: receives connections as the session opens them.
#[derive(Debug)]
pub struct MockBroker {
    opens: Arc<AtomicUsize>,
    incoming: mpsc::UnboundedReceiver<MockConnection>,
}

pub fn mock_transport() -> (MockTransport, MockBroker) {
    let opens = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockTransport {
            opens: opens.clone(),
            accepted: tx,
        },
        MockBroker {
            opens,
            incoming: rx,
        },
    )
}

impl Transport for MockTransport {
    fn open(&self, url: &Url) -> TransportHandle {
        let (handle, peer) = TransportHandle::pair();
        self.opens.fetch_add(1, Ordering::SeqCst);
        let _ = self.accepted.send(MockConnection {
            url: url.clone(),
            peer,
            decoder: FrameDecoder::new(),
        });
        handle
    }
}

impl MockBroker {
    /// Number of transports opened so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Waits for the session to open a transport.
    pub async fn accept(&mut self) -> MockConnection {
        self.incoming.recv().await.expect("session dropped the transport")
    }

    /// Accepts a connection and completes the STOMP handshake.
    pub async fn accept_session(&mut self) -> MockConnection {
        let mut conn = self.accept().await;
        conn.handshake().await;
        conn
    }

    /// A connection opened but not yet consumed, if any.
    pub fn try_accept(&mut self) -> Option<MockConnection> {
        self.incoming.try_recv().ok()
    }
}

/// One connection as seen by the fake broker.
#[derive(Debug)]
pub struct MockConnection {
    pub url: Url,
    peer: TransportPeer,
    decoder: FrameDecoder,
}

impl MockConnection {
    pub fn open(&self) {
        self.peer.emit(TransportEvent::Opened);
    }

    /// Opens, expects CONNECT and replies CONNECTED without heart-beats.
    pub async fn handshake(&mut self) -> Frame {
        self.open();
        let connect = self.expect_frame().await;
        assert_eq!(connect.command, FrameCommand::Connect);
        self.send_frame(
            &Frame::new(FrameCommand::Connected)
                .header("version", "1.2")
                .header("heart-beat", "0,0"),
        );
        connect
    }

    pub fn send_frame(&self, frame: &Frame) {
        self.peer.emit(TransportEvent::Message(encode_frame(frame)));
    }

    pub fn send_raw(&self, text: &str) {
        self.peer.emit(TransportEvent::Message(text.to_string()));
    }

    /// Pushes a MESSAGE frame routed by subscription id.
    pub fn message(&self, subscription: &str, destination: &str, body: &str) {
        self.send_frame(
            &Frame::new(FrameCommand::Message)
                .header("subscription", subscription)
                .header("destination", destination)
                .header("message-id", "m-1")
                .body(body),
        );
    }

    /// Fails the connection the way a real transport does.
    pub fn fail(&self, reason: &str) {
        self.peer.fail(reason);
    }

    /// Stops accepting outbound messages while inbound events keep flowing,
    /// like a socket whose write half died first.
    pub fn close_outbound(&mut self) {
        self.peer.outbound.close();
    }

    /// Next outbound STOMP frame, skipping heart-beats.
    pub async fn expect_frame(&mut self) -> Frame {
        loop {
            match self.peer.outbound.recv().await {
                Some(Outbound::Text(text)) => {
                    for item in self.decoder.push(text.as_bytes()) {
                        if let Inbound::Frame(frame) = item.expect("client sent a malformed frame") {
                            return frame;
                        }
                    }
                }
                Some(Outbound::Close) => panic!("transport closed while expecting a frame"),
                None => panic!("transport dropped while expecting a frame"),
            }
        }
    }

    /// Next outbound SUBSCRIBE frame, returning (id, destination).
    pub async fn expect_subscribe(&mut self) -> (String, String) {
        let frame = self.expect_frame().await;
        assert_eq!(frame.command, FrameCommand::Subscribe, "got {:?}", frame);
        (
            frame.get("id").unwrap_or_default().to_string(),
            frame.destination().unwrap_or_default().to_string(),
        )
    }

    /// Collects frames until the client closes the transport.
    pub async fn frames_until_close(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.peer.outbound.recv().await {
                Some(Outbound::Text(text)) => {
                    for item in self.decoder.push(text.as_bytes()) {
                        if let Ok(Inbound::Frame(frame)) = item {
                            frames.push(frame);
                        }
                    }
                }
                Some(Outbound::Close) | None => return frames,
            }
        }
    }

    /// Raw outbound messages currently queued, without waiting.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = self.peer.outbound.try_recv() {
            out.push(message);
        }
        out
    }
}
